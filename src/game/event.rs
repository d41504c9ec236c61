//! Events emitted by orchestrators and fanned out by the hub.
//!
//! Every envelope carries the room, the round it concerns, a per-room
//! strictly-increasing sequence ordinal, and a timestamp. The `kind`/
//! `payload` wire split comes from the adjacently-tagged serde
//! representation, so the JSON a subscriber sees is
//! `{ "room": .., "roundId": .., "seq": .., "timestamp": .., "kind":
//! "BALL_DRAWN", "payload": { .. } }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::{BallKind, Phase};
use super::round::{Ball, ExtraSide, Round};

/// Tagged event variants. `Heartbeat` is synthesized by the hub; everything
/// else originates in an orchestrator command handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    RoundCreated {
        #[serde(rename = "hasJackpot")]
        has_jackpot: bool,
    },
    PhaseChanged {
        old: Option<Phase>,
        new: Phase,
    },
    BallDrawn {
        kind: BallKind,
        ball: Ball,
    },
    ExtraSideSelected {
        side: ExtraSide,
    },
    JackpotWinnerNotified {
        #[serde(rename = "subjectId")]
        subject_id: String,
    },
    RoundCancelled {
        reason: String,
    },
    RoundCompleted {},
    Heartbeat {},
}

impl Event {
    /// Wire kind string, as used in subscription topic filters.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RoundCreated { .. } => "ROUND_CREATED",
            Event::PhaseChanged { .. } => "PHASE_CHANGED",
            Event::BallDrawn { .. } => "BALL_DRAWN",
            Event::ExtraSideSelected { .. } => "EXTRA_SIDE_SELECTED",
            Event::JackpotWinnerNotified { .. } => "JACKPOT_WINNER_NOTIFIED",
            Event::RoundCancelled { .. } => "ROUND_CANCELLED",
            Event::RoundCompleted {} => "ROUND_COMPLETED",
            Event::Heartbeat {} => "HEARTBEAT",
        }
    }
}

/// An event plus its ordering metadata, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub room: String,
    #[serde(rename = "roundId")]
    pub round_id: Option<Uuid>,
    #[serde(rename = "monotonicSequence")]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Phase of the round when the event was emitted.
    pub phase: Option<Phase>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(
        room: &str,
        round_id: Option<Uuid>,
        seq: u64,
        phase: Option<Phase>,
        event: Event,
    ) -> Self {
        EventEnvelope {
            room: room.to_string(),
            round_id,
            seq,
            timestamp: Utc::now(),
            phase,
            event,
        }
    }

    /// Envelope for an orchestrator event against the given round state.
    pub fn for_round(round: &Round, seq: u64, event: Event) -> Self {
        Self::new(
            &round.room,
            Some(round.round_id),
            seq,
            Some(round.phase),
            event,
        )
    }

    /// Envelope for a room without a live round (e.g. a heartbeat or the
    /// synthetic preparation snapshot).
    pub fn for_room(room: &str, seq: u64, event: Event) -> Self {
        Self::new(room, None, seq, None, event)
    }
}
