//! # Session layer — one live peer bound to the hub and a room
//!
//! A session is the framing-agnostic half of a connection: it speaks
//! parsed [`ClientFrame`]s in and [`ServerFrame`]s out over in-process
//! channels, and an adapter (the TCP JSON-lines binding in [`tcp`], or any
//! streaming-RPC equivalent) pumps those channels to the real peer. The
//! same session semantics therefore apply to every wire binding.
//!
//! Lifecycle: authenticate the open token to a subject and role, emit
//! `HELLO`, send the room's synthetic phase snapshot, register with the
//! hub, then loop — forwarding peer commands to the room orchestrator
//! (dealers only) and hub deliveries back to the peer. A peer that stays
//! silent past the read deadline, or that the hub closes (slow consumer,
//! watchdog, stream age cap), is torn down with a `BYE` frame.

pub mod tcp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::game::command::{Command, Origin};
use crate::game::event::EventEnvelope;
use crate::game::orchestrator::OrchestratorHandle;
use crate::hub::{EventHub, HubDelivery, Role, TopicFilter};
use crate::logutil::escape_log;
use crate::metrics;

/// Authenticated identity of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSubject {
    pub subject_id: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown token")]
    UnknownToken,
}

/// Token → subject resolution. Pure; real deployments inject their own
/// implementation, the binary uses the config-backed static table.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<AuthSubject, AuthError>;
}

/// Fixed token table from the config file.
pub struct StaticTokenValidator {
    tokens: HashMap<String, AuthSubject>,
}

impl StaticTokenValidator {
    pub fn new(tokens: HashMap<String, AuthSubject>) -> Self {
        Self { tokens }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Result<AuthSubject, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::UnknownToken)
    }
}

/// First frame of a connection: which room to bind and as whom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpen {
    pub room: String,
    pub token: String,
}

/// Side-channel and liveness commands handled by the session itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideChannelCommand {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, data: serde_json::Value },
    Ping {},
}

/// Everything a peer may send after the open frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameKind {
    Side(SideChannelCommand),
    Game(Command),
}

/// One inbound wire frame: `{ room, type, payload }`. A missing room
/// defaults to the session's bound room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(flatten)]
    pub kind: FrameKind,
}

/// Non-event frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlFrame {
    Hello {
        room: String,
        #[serde(rename = "subjectId")]
        subject_id: String,
        role: Role,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {},
    Note {
        topic: String,
        data: serde_json::Value,
    },
    Bye {
        reason: String,
    },
}

/// Outbound wire frames: orchestrator/hub events are sent as bare
/// envelopes, everything else as control frames. Both carry a `kind`
/// discriminator on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(EventEnvelope),
    Control(ControlFrame),
}

/// Deadlines for one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub read_deadline: Duration,
    pub write_deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
        }
    }
}

/// Shared collaborators every session needs; cheap to clone per
/// connection.
#[derive(Clone)]
pub struct SessionDeps {
    pub hub: EventHub,
    pub rooms: Arc<HashMap<String, OrchestratorHandle>>,
    pub validator: Arc<dyn TokenValidator>,
    pub config: SessionConfig,
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication rejected")]
    AuthRejected,

    #[error("room {0} is not served by this process")]
    UnknownRoom(String),

    #[error("peer disconnected")]
    PeerGone,
}

async fn send_frame(outbound: &mpsc::Sender<ServerFrame>, frame: ServerFrame) -> bool {
    outbound.send(frame).await.is_ok()
}

async fn send_error(outbound: &mpsc::Sender<ServerFrame>, code: &str, message: String) -> bool {
    send_frame(
        outbound,
        ServerFrame::Control(ControlFrame::Error {
            code: code.to_string(),
            message,
        }),
    )
    .await
}

async fn send_bye(outbound: &mpsc::Sender<ServerFrame>, reason: &str) {
    let _ = send_frame(
        outbound,
        ServerFrame::Control(ControlFrame::Bye {
            reason: reason.to_string(),
        }),
    )
    .await;
}

/// Drive one session to completion. The adapter owns the real socket and
/// its write deadline; this loop owns authentication, the role gate, the
/// read deadline and hub registration.
pub async fn run_session(
    open: SessionOpen,
    mut inbound: mpsc::Receiver<ClientFrame>,
    outbound: mpsc::Sender<ServerFrame>,
    mut deps: SessionDeps,
) -> Result<(), SessionError> {
    let subject = match deps.validator.validate(&open.token) {
        Ok(subject) => subject,
        Err(e) => {
            warn!("session rejected for room {}: {e}", escape_log(&open.room));
            send_error(&outbound, "AUTH_REJECTED", e.to_string()).await;
            send_bye(&outbound, "auth-rejected").await;
            return Err(SessionError::AuthRejected);
        }
    };
    let Some(orchestrator) = deps.rooms.get(&open.room).cloned() else {
        send_error(
            &outbound,
            "AUTH_REJECTED",
            format!("room {} not served here", open.room),
        )
        .await;
        send_bye(&outbound, "unknown-room").await;
        return Err(SessionError::UnknownRoom(open.room));
    };

    info!(
        "session open: {} as {:?} in {}",
        subject.subject_id,
        subject.role,
        escape_log(&open.room)
    );
    metrics::inc_sessions_opened();

    send_frame(
        &outbound,
        ServerFrame::Control(ControlFrame::Hello {
            room: open.room.clone(),
            subject_id: subject.subject_id.clone(),
            role: subject.role,
        }),
    )
    .await;

    // Snapshot before registering: a late joiner reconstructs state from
    // one synthetic phase-change, and the delivered stream stays strictly
    // increasing from the registration point.
    if let Some(snapshot) = orchestrator.snapshot().await {
        send_frame(&outbound, ServerFrame::Event(snapshot)).await;
    }
    let (sub_id, mut hub_rx) = deps
        .hub
        .subscribe(&open.room, subject.role, TopicFilter::All)
        .await;

    let mut last_read = Instant::now();
    let close_reason: &str;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(last_read + deps.config.read_deadline) => {
                close_reason = "read-timeout";
                break;
            }
            changed = deps.shutdown.changed() => {
                // A vanished sender means the server is gone; close too.
                if changed.is_err() || *deps.shutdown.borrow() {
                    close_reason = "server-shutdown";
                    break;
                }
            }
            frame = inbound.recv() => {
                match frame {
                    Some(frame) => {
                        last_read = Instant::now();
                        if !handle_frame(frame, &open, &subject, &orchestrator, sub_id, &deps, &outbound).await {
                            close_reason = "peer-gone";
                            break;
                        }
                    }
                    None => {
                        close_reason = "peer-disconnect";
                        break;
                    }
                }
            }
            delivery = hub_rx.recv() => {
                match delivery {
                    Some(HubDelivery::Event(env)) => {
                        if !send_frame(&outbound, ServerFrame::Event(env)).await {
                            close_reason = "peer-gone";
                            break;
                        }
                    }
                    Some(HubDelivery::Note { topic, data }) => {
                        if !send_frame(&outbound, ServerFrame::Control(ControlFrame::Note { topic, data })).await {
                            close_reason = "peer-gone";
                            break;
                        }
                    }
                    Some(HubDelivery::Bye { reason }) => {
                        close_reason = reason;
                        break;
                    }
                    None => {
                        // The hub dropped us (slow consumer); normal close.
                        close_reason = "subscriber-slow";
                        break;
                    }
                }
            }
        }
    }

    send_bye(&outbound, close_reason).await;
    deps.hub.unsubscribe(sub_id).await;
    metrics::inc_sessions_closed();
    info!(
        "session closed: {} in {} ({close_reason})",
        subject.subject_id,
        escape_log(&open.room)
    );
    Ok(())
}

/// Handle one peer frame. Returns false when the outbound side is gone.
async fn handle_frame(
    frame: ClientFrame,
    open: &SessionOpen,
    subject: &AuthSubject,
    orchestrator: &OrchestratorHandle,
    sub_id: uuid::Uuid,
    deps: &SessionDeps,
    outbound: &mpsc::Sender<ServerFrame>,
) -> bool {
    // Sessions are bound to one room; frames naming another are refused.
    if let Some(room) = &frame.room {
        if room != &open.room {
            return send_error(
                outbound,
                "AUTH_REJECTED",
                format!("session is bound to room {}", open.room),
            )
            .await;
        }
    }

    match frame.kind {
        FrameKind::Side(SideChannelCommand::Ping {}) => {
            send_frame(outbound, ServerFrame::Control(ControlFrame::Pong {})).await
        }
        FrameKind::Side(side) if subject.role != Role::Dealer => {
            debug!("non-dealer side-channel frame refused: {side:?}");
            send_error(
                outbound,
                "AUTH_REJECTED",
                "side channel requires the dealer role".into(),
            )
            .await
        }
        FrameKind::Side(SideChannelCommand::Subscribe { topic }) => {
            debug!(
                "{} subscribes note topic {}",
                subject.subject_id,
                escape_log(&topic)
            );
            deps.hub.note_subscribe(sub_id, &open.room, &topic).await;
            true
        }
        FrameKind::Side(SideChannelCommand::Unsubscribe { topic }) => {
            deps.hub.note_unsubscribe(sub_id, &open.room, &topic).await;
            true
        }
        FrameKind::Side(SideChannelCommand::Publish { topic, data }) => {
            deps.hub.publish_note(&open.room, &topic, data).await;
            true
        }
        FrameKind::Game(command) => {
            if subject.role != Role::Dealer {
                return send_error(
                    outbound,
                    "AUTH_REJECTED",
                    "state commands require the dealer role".into(),
                )
                .await;
            }
            let origin = match command {
                Command::Reset {} => Origin::Operator,
                _ => Origin::Dealer,
            };
            match orchestrator.submit(command, origin).await {
                Ok(()) => true,
                Err(e) => send_error(outbound, e.code(), e.to_string()).await,
            }
        }
    }
}
