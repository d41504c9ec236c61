//! Commands accepted by a room orchestrator and the dealer-facing wire
//! frames they arrive in.
//!
//! Wire shape (one JSON object per frame): `{ "room": "...", "type":
//! "DRAW_BALL", "payload": { ... } }`. The session layer parses frames,
//! enforces the role gate, and forwards the inner [`Command`] to the room's
//! orchestrator together with a reply slot so validation errors reach the
//! originating peer only.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use super::phase::{BallKind, Phase};
use super::round::ExtraSide;

/// Validation and processing failures for a single command.
///
/// Each variant maps 1:1 onto a wire error code; see [`GameError::code`].
/// Faults are local to the originating session — the orchestrator never
/// mutates state on a rejected command and never crashes the room.
#[derive(Debug, Clone, Error)]
pub enum GameError {
    #[error("command not accepted in phase {phase:?}: {detail}")]
    InvalidPhase { phase: Phase, detail: String },

    #[error("invalid ball: {detail}")]
    InvalidBall { detail: String },

    #[error("internal fault: {detail}")]
    Internal { detail: String },
}

impl GameError {
    /// Stable wire code for the error frame.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidPhase { .. } => "INVALID_PHASE",
            GameError::InvalidBall { .. } => "INVALID_BALL",
            GameError::Internal { .. } => "INTERNAL_FAULT",
        }
    }
}

/// One ball entry of a `DRAW_BALL` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallDraw {
    pub number: u8,
    #[serde(default, rename = "isLast")]
    pub is_last: bool,
}

/// State-affecting commands processed by the orchestrator. Timers inject
/// `AdvanceStage { force: false }` through the same queue as dealers do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    StartNewRound {
        #[serde(default, rename = "hasJackpot")]
        has_jackpot: bool,
    },
    DrawBall {
        kind: BallKind,
        balls: Vec<BallDraw>,
    },
    SelectExtraSide {
        side: ExtraSide,
    },
    NotifyJackpotWinner {
        #[serde(rename = "subjectId")]
        subject_id: String,
    },
    AdvanceStage {
        #[serde(default)]
        force: bool,
    },
    CancelRound {
        reason: String,
    },
    Reset {},
}

/// Where a command came from. Timer and operator origins bypass the dealer
/// role gate; the gate itself lives in the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Dealer,
    Timer,
    Operator,
}

/// A command plus its reply slot, as queued to the orchestrator task.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    pub origin: Origin,
    /// Outcome for the originating session; `None` for fire-and-forget
    /// internal submissions.
    pub reply: Option<oneshot::Sender<Result<(), GameError>>>,
}

impl CommandRequest {
    pub fn internal(command: Command, origin: Origin) -> Self {
        CommandRequest {
            command,
            origin,
            reply: None,
        }
    }

    /// Deliver the outcome to the originator, if one is still listening.
    pub fn respond(self, outcome: Result<(), GameError>) {
        if let Some(tx) = self.reply {
            let _ = tx.send(outcome);
        }
    }
}
