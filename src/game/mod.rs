//! # Game flow — the round state machine and its single-writer owner
//!
//! ## Components
//!
//! - [`phase`] - Static phase table: timeout class, draw windows,
//!   cancellation rules, successors
//! - [`round`] - The round entity and ball-draw validation
//! - [`command`] - Dealer/operator commands and the error taxonomy
//! - [`event`] - Tagged events and the sequenced envelope subscribers see
//! - [`orchestrator`] - The per-room actor that applies commands, runs
//!   phase timers, persists state, and emits events
//!
//! ## Round lifecycle
//!
//! A round is created by `START_NEW_ROUND`, walks
//! `NewRound → CardPurchase* → Drawing* → ExtraBall* → PayoutSettlement`,
//! optionally the jackpot sub-sequence, then `Lucky* → GameOver`, at which
//! point it is appended to history and the live slot is cleared. Dealer
//! draw commands are only accepted in the matching `*DrawingStart` phase;
//! everything else advances on per-phase timers. Cancellation is allowed
//! in most phases and finalizes the round immediately.

pub mod command;
pub mod event;
pub mod orchestrator;
pub mod phase;
pub mod round;

pub use command::{Command, GameError, Origin};
pub use event::{Event, EventEnvelope};
pub use orchestrator::{start_orchestrator, OrchestratorHandle};
pub use phase::{AutoAdvance, BallKind, Phase, PhaseConfig};
pub use round::{Ball, ExtraSide, Round};
