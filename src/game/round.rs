//! The round entity: the single mutable object a room's orchestrator owns.
//!
//! Everything outside the orchestrator sees a round only as an immutable
//! snapshot carried on events. All mutation helpers here return
//! [`GameError`](super::command::GameError) values instead of panicking so
//! a bad dealer frame can never poison the owning actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::command::GameError;
use super::phase::{BallKind, Phase};

/// Lowest and highest drawable ball number, inclusive.
pub const BALL_MIN: u8 = 1;
pub const BALL_MAX: u8 = 75;

/// Number of advertised lucky numbers per room.
pub const LUCKY_SET_SIZE: usize = 7;

/// Which half of the extra-ball board the round plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtraSide {
    Left,
    Right,
}

/// One drawn ball.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ball {
    pub number: u8,
    pub kind: BallKind,
    pub drawn_at: DateTime<Utc>,
    pub is_last: bool,
}

/// Why and when a round was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInfo {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One game round from creation to GameOver or cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub round_id: Uuid,
    pub room: String,
    pub phase: Phase,
    pub phase_entered_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub has_jackpot: bool,
    pub jackpot_winner: Option<String>,
    pub cancelled: Option<CancelInfo>,
    pub selected_extra_side: Option<ExtraSide>,
    pub regular: Vec<Ball>,
    pub extra: Vec<Ball>,
    pub jackpot: Vec<Ball>,
    pub lucky: Vec<Ball>,
    /// Next event ordinal for this room's stream. Persisted so a recovered
    /// round continues without sequence gaps.
    pub next_seq: u64,
    /// Cleared when a hot-tier save fails; a non-recoverable round is not
    /// resumed after restart.
    pub recoverable: bool,
}

impl Round {
    /// Create a round in `Preparation` for the given room.
    pub fn new(room: String, has_jackpot: bool) -> Self {
        let now = Utc::now();
        Round {
            round_id: Uuid::new_v4(),
            room,
            phase: Phase::Preparation,
            phase_entered_at: now,
            started_at: now,
            ended_at: None,
            has_jackpot,
            jackpot_winner: None,
            cancelled: None,
            selected_extra_side: None,
            regular: Vec::new(),
            extra: Vec::new(),
            jackpot: Vec::new(),
            lucky: Vec::new(),
            next_seq: 0,
            recoverable: true,
        }
    }

    /// Ordered balls of one kind.
    pub fn balls(&self, kind: BallKind) -> &[Ball] {
        match kind {
            BallKind::Regular => &self.regular,
            BallKind::Extra => &self.extra,
            BallKind::Jackpot => &self.jackpot,
            BallKind::Lucky => &self.lucky,
        }
    }

    fn balls_mut(&mut self, kind: BallKind) -> &mut Vec<Ball> {
        match kind {
            BallKind::Regular => &mut self.regular,
            BallKind::Extra => &mut self.extra,
            BallKind::Jackpot => &mut self.jackpot,
            BallKind::Lucky => &mut self.lucky,
        }
    }

    /// True when `number` already exists in `kind`'s uniqueness scope.
    /// Regular and Extra share one scope; Jackpot and Lucky each have their
    /// own.
    pub fn is_duplicate(&self, kind: BallKind, number: u8) -> bool {
        let scope: &[&[Ball]] = match kind {
            BallKind::Regular | BallKind::Extra => &[&self.regular, &self.extra],
            BallKind::Jackpot => &[&self.jackpot],
            BallKind::Lucky => &[&self.lucky],
        };
        scope
            .iter()
            .any(|seq| seq.iter().any(|b| b.number == number))
    }

    /// Validate and append one drawn ball. Returns the appended ball and
    /// whether this draw closes the window: either the dealer asserted
    /// `is_last`, or the kind's cap is reached by this ball.
    pub fn draw_ball(
        &mut self,
        kind: BallKind,
        number: u8,
        is_last: bool,
    ) -> Result<(Ball, bool), GameError> {
        if !(BALL_MIN..=BALL_MAX).contains(&number) {
            return Err(GameError::InvalidBall {
                detail: format!("number {number} outside [{BALL_MIN},{BALL_MAX}]"),
            });
        }
        if self.is_duplicate(kind, number) {
            return Err(GameError::InvalidBall {
                detail: format!("duplicate {kind:?} number {number}"),
            });
        }
        if let Some(cap) = kind.cap() {
            if self.balls(kind).len() >= cap {
                return Err(GameError::InvalidBall {
                    detail: format!("{kind:?} cap of {cap} already reached"),
                });
            }
        }
        let ball = Ball {
            number,
            kind,
            drawn_at: Utc::now(),
            is_last,
        };
        let seq = self.balls_mut(kind);
        seq.push(ball.clone());
        let at_cap = kind.cap().is_some_and(|cap| seq.len() >= cap);
        Ok((ball, is_last || at_cap))
    }

    /// Move to `next`, stamping the entry time.
    pub fn enter_phase(&mut self, next: Phase) {
        self.phase = next;
        self.phase_entered_at = Utc::now();
    }

    /// Mark the round finished at GameOver.
    pub fn complete(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Mark the round cancelled.
    pub fn cancel(&mut self, reason: String) {
        let now = Utc::now();
        self.cancelled = Some(CancelInfo { reason, at: now });
        self.ended_at = Some(now);
    }

    pub fn is_finished(&self) -> bool {
        self.cancelled.is_some() || self.phase.is_terminal()
    }
}
