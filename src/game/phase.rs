//! Phase table and transition rules for a game round.
//!
//! A round walks a fixed sequence of phases. Each phase has a static
//! [`PhaseConfig`] describing how it advances (timer or dealer command),
//! whether it accepts ball draws and of which kind, and whether the round
//! may be cancelled while in it. The table is definitional: timeouts, draw
//! windows and successors here are the contract the dealer clients and the
//! settlement side are built against.
//!
//! The only data-dependent transition is the jackpot branch: leaving
//! `PayoutSettlement` skips `JackpotStart..=JackpotSettlement` entirely
//! when the round was created without a jackpot or a winner is already
//! recorded. `GameOver` loops back to `Preparation`, but that edge is taken
//! only by an explicit new-round command, never by a timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::round::Round;

/// Discrete states of the round state machine, in play order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Preparation,
    NewRound,
    CardPurchaseOpen,
    CardPurchaseClose,
    DrawingStart,
    DrawingClose,
    ExtraBallPrepare,
    ExtraBallSideSelectOpen,
    ExtraBallSideSelectClose,
    ExtraBallWaitClaim,
    ExtraBallDrawingStart,
    ExtraBallDrawingClose,
    PayoutSettlement,
    JackpotStart,
    JackpotDrawingStart,
    JackpotDrawingClose,
    JackpotSettlement,
    LuckyPrepare,
    LuckyDrawingStart,
    LuckyDrawingClose,
    GameOver,
}

/// The kind of ball a draw phase accepts. Drives the uniqueness scope and
/// the per-round cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallKind {
    Regular,
    Extra,
    Jackpot,
    Lucky,
}

impl BallKind {
    /// Maximum balls of this kind per round. `None` is unbounded.
    pub fn cap(self) -> Option<usize> {
        match self {
            BallKind::Regular => Some(75),
            BallKind::Extra => Some(3),
            BallKind::Jackpot => None,
            BallKind::Lucky => Some(7),
        }
    }
}

/// How a phase advances to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAdvance {
    /// A timer fires after the duration and advances the round.
    After(Duration),
    /// No timer; the phase waits for a dealer command or an in-phase
    /// action that completes it (final ball, side selection, new round).
    Manual,
}

/// Static per-phase configuration.
#[derive(Debug, Clone, Copy)]
pub struct PhaseConfig {
    pub auto_advance: AutoAdvance,
    /// `Some(kind)` when the phase is a draw window for that ball kind.
    pub ball_draw: Option<BallKind>,
    pub cancellable: bool,
    /// Successor when no branch rule applies.
    pub natural_successor: Phase,
}

const fn secs(s: u64) -> AutoAdvance {
    AutoAdvance::After(Duration::from_secs(s))
}

impl Phase {
    /// Static configuration lookup. Pure and total over the enum.
    pub fn config(self) -> PhaseConfig {
        use Phase::*;
        match self {
            Preparation => PhaseConfig {
                auto_advance: AutoAdvance::Manual,
                ball_draw: None,
                cancellable: false,
                natural_successor: NewRound,
            },
            NewRound => PhaseConfig {
                auto_advance: secs(2),
                ball_draw: None,
                cancellable: true,
                natural_successor: CardPurchaseOpen,
            },
            CardPurchaseOpen => PhaseConfig {
                auto_advance: secs(12),
                ball_draw: None,
                cancellable: true,
                natural_successor: CardPurchaseClose,
            },
            CardPurchaseClose => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: DrawingStart,
            },
            DrawingStart => PhaseConfig {
                auto_advance: AutoAdvance::Manual,
                ball_draw: Some(BallKind::Regular),
                cancellable: true,
                natural_successor: DrawingClose,
            },
            DrawingClose => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: ExtraBallPrepare,
            },
            ExtraBallPrepare => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: ExtraBallSideSelectOpen,
            },
            ExtraBallSideSelectOpen => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: ExtraBallSideSelectClose,
            },
            ExtraBallSideSelectClose => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: ExtraBallWaitClaim,
            },
            ExtraBallWaitClaim => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: ExtraBallDrawingStart,
            },
            ExtraBallDrawingStart => PhaseConfig {
                auto_advance: AutoAdvance::Manual,
                ball_draw: Some(BallKind::Extra),
                cancellable: true,
                natural_successor: ExtraBallDrawingClose,
            },
            ExtraBallDrawingClose => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: PayoutSettlement,
            },
            PayoutSettlement => PhaseConfig {
                auto_advance: secs(3),
                ball_draw: None,
                cancellable: true,
                natural_successor: JackpotStart,
            },
            JackpotStart => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: JackpotDrawingStart,
            },
            JackpotDrawingStart => PhaseConfig {
                auto_advance: AutoAdvance::Manual,
                ball_draw: Some(BallKind::Jackpot),
                cancellable: true,
                natural_successor: JackpotDrawingClose,
            },
            JackpotDrawingClose => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: true,
                natural_successor: JackpotSettlement,
            },
            JackpotSettlement => PhaseConfig {
                auto_advance: secs(3),
                ball_draw: None,
                cancellable: true,
                natural_successor: LuckyPrepare,
            },
            LuckyPrepare => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: false,
                natural_successor: LuckyDrawingStart,
            },
            LuckyDrawingStart => PhaseConfig {
                auto_advance: AutoAdvance::Manual,
                ball_draw: Some(BallKind::Lucky),
                cancellable: false,
                natural_successor: LuckyDrawingClose,
            },
            LuckyDrawingClose => PhaseConfig {
                auto_advance: secs(1),
                ball_draw: None,
                cancellable: false,
                natural_successor: GameOver,
            },
            GameOver => PhaseConfig {
                auto_advance: AutoAdvance::Manual,
                ball_draw: None,
                cancellable: false,
                natural_successor: Preparation,
            },
        }
    }

    /// Successor of this phase for the given round, applying the jackpot
    /// branch rule: the jackpot sub-sequence runs only when the round was
    /// created with a jackpot and no winner is recorded yet.
    pub fn successor(self, round: &Round) -> Phase {
        match self {
            Phase::PayoutSettlement => {
                if round.has_jackpot && round.jackpot_winner.is_none() {
                    Phase::JackpotStart
                } else {
                    Phase::LuckyPrepare
                }
            }
            other => other.config().natural_successor,
        }
    }

    /// True for the four phases of the jackpot sub-sequence.
    pub fn in_jackpot_branch(self) -> bool {
        matches!(
            self,
            Phase::JackpotStart
                | Phase::JackpotDrawingStart
                | Phase::JackpotDrawingClose
                | Phase::JackpotSettlement
        )
    }

    /// Terminal phase of a completed (non-cancelled) round.
    pub fn is_terminal(self) -> bool {
        self == Phase::GameOver
    }
}
