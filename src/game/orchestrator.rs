//! The round orchestrator: one single-writer actor per room.
//!
//! All round mutations flow through one `mpsc` queue — dealer commands,
//! operator resets, and the phase timer all inject into the same stream,
//! so ball uniqueness, phase legality and event ordering reduce to plain
//! sequential code. Per command the actor validates against the current
//! phase configuration, applies the transition, persists the round,
//! publishes the resulting events in handler order, and reschedules the
//! auto-advance timer for the phase it landed in.
//!
//! A persistence fault never stops play: the in-memory transition still
//! reaches subscribers, the round is flagged non-recoverable, and the next
//! restart begins fresh. Any other handler failure is reported to the
//! originating session only; a bad command cannot crash its room.

use std::time::Duration;

use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::hub::EventHub;
use crate::logutil::escape_log;
use crate::metrics;
use crate::storage::{RoundStore, StoreError};

use super::command::{BallDraw, Command, CommandRequest, GameError, Origin};
use super::event::{Event, EventEnvelope};
use super::phase::{AutoAdvance, BallKind, Phase};
use super::round::{Ball, ExtraSide, Round, BALL_MAX, LUCKY_SET_SIZE};

/// How long a shutting-down orchestrator keeps draining queued commands
/// before abandoning the remainder.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(15);

enum OrchestratorMsg {
    Command(CommandRequest),
    /// Synthetic snapshot for a joining subscriber:
    /// `PhaseChanged { old: None, new: <current> }`.
    Snapshot(oneshot::Sender<EventEnvelope>),
    /// Copy of the live round for status queries.
    State(oneshot::Sender<Option<Round>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a room's orchestrator task.
#[derive(Clone)]
pub struct OrchestratorHandle {
    room: String,
    tx: mpsc::UnboundedSender<OrchestratorMsg>,
}

impl OrchestratorHandle {
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Queue a command and wait for its outcome. Errors are local to the
    /// caller; the room keeps processing either way.
    pub async fn submit(&self, command: Command, origin: Origin) -> Result<(), GameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let req = CommandRequest {
            command,
            origin,
            reply: Some(reply_tx),
        };
        self.tx
            .send(OrchestratorMsg::Command(req))
            .map_err(|_| GameError::Internal {
                detail: format!("room {} is shut down", self.room),
            })?;
        reply_rx.await.unwrap_or_else(|_| {
            Err(GameError::Internal {
                detail: "orchestrator dropped the command".into(),
            })
        })
    }

    /// Queue a command without waiting for the outcome.
    pub fn submit_nowait(&self, command: Command, origin: Origin) {
        let _ = self
            .tx
            .send(OrchestratorMsg::Command(CommandRequest::internal(
                command, origin,
            )));
    }

    /// Synthetic phase-change a late joiner can reconstruct state from.
    pub async fn snapshot(&self) -> Option<EventEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(OrchestratorMsg::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Copy of the live round, if any.
    pub async fn current_round(&self) -> Option<Round> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(OrchestratorMsg::State(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Drain and stop the orchestrator. Resolves when the final save
    /// completed (or the task was already gone).
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(OrchestratorMsg::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Recovery + startup for one room: rehydrate the live round (if the hot
/// tier has one), ensure the advertised lucky set exists, then spawn the
/// actor loop. Called before any session is accepted.
pub fn start_orchestrator(
    room: &str,
    store: RoundStore,
    hub: EventHub,
) -> Result<OrchestratorHandle, StoreError> {
    ensure_lucky_set(room, &store)?;

    let recovered = store.load_current(room)?;
    let seq = recovered.as_ref().map(|r| r.next_seq).unwrap_or(0);
    match &recovered {
        Some(round) => info!(
            "room {room}: resuming round {} in {:?}",
            round.round_id, round.phase
        ),
        None => info!("room {room}: no recoverable round, starting in Preparation"),
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let actor = RoundOrchestrator {
        room: room.to_string(),
        store,
        hub,
        rx,
        round: recovered,
        seq,
        timer: None,
    };
    tokio::spawn(actor.run());
    Ok(OrchestratorHandle {
        room: room.to_string(),
        tx,
    })
}

/// Synthesize and persist the room's 7 advertised lucky numbers when none
/// are stored yet. These are the card-coverage announcement, not the balls
/// drawn in the Lucky phases.
fn ensure_lucky_set(room: &str, store: &RoundStore) -> Result<(), StoreError> {
    if store.get_lucky_balls(room)?.is_some() {
        return Ok(());
    }
    let mut numbers: Vec<u8> = (1..=BALL_MAX).collect();
    numbers.shuffle(&mut rand::thread_rng());
    numbers.truncate(LUCKY_SET_SIZE);
    let now = chrono::Utc::now();
    let balls: Vec<Ball> = numbers
        .into_iter()
        .map(|number| Ball {
            number,
            kind: BallKind::Lucky,
            drawn_at: now,
            is_last: false,
        })
        .collect();
    info!(
        "room {room}: seeded lucky set {:?}",
        balls.iter().map(|b| b.number).collect::<Vec<_>>()
    );
    store.save_lucky_balls(room, &balls)
}

struct RoundOrchestrator {
    room: String,
    store: RoundStore,
    hub: EventHub,
    rx: mpsc::UnboundedReceiver<OrchestratorMsg>,
    round: Option<Round>,
    /// Next event ordinal for this room's stream.
    seq: u64,
    /// Auto-advance deadline for the current phase; `None` in manual
    /// phases and when no round is live.
    timer: Option<Instant>,
}

impl RoundOrchestrator {
    async fn run(mut self) {
        // A recovered timer phase restarts at full duration from now;
        // timer deadlines are deliberately not persisted.
        if let Some(round) = &self.round {
            self.timer = deadline_for(round.phase);
        }

        loop {
            let deadline = self.timer;
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(OrchestratorMsg::Command(req)) => self.handle_request(req).await,
                        Some(OrchestratorMsg::Snapshot(tx)) => {
                            let _ = tx.send(self.snapshot_envelope());
                        }
                        Some(OrchestratorMsg::State(tx)) => {
                            let _ = tx.send(self.round.clone());
                        }
                        Some(OrchestratorMsg::Shutdown(done)) => {
                            self.drain_and_stop().await;
                            let _ = done.send(());
                            return;
                        }
                        None => {
                            self.final_save();
                            return;
                        }
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    self.timer = None;
                    self.handle_request(CommandRequest::internal(
                        Command::AdvanceStage { force: false },
                        Origin::Timer,
                    ))
                    .await;
                }
            }
        }
    }

    async fn drain_and_stop(&mut self) {
        let deadline = Instant::now() + DRAIN_DEADLINE;
        self.rx.close();
        loop {
            if Instant::now() >= deadline {
                warn!("room {}: drain deadline hit, abandoning queue", self.room);
                break;
            }
            match self.rx.try_recv() {
                Ok(OrchestratorMsg::Command(req)) => self.handle_request(req).await,
                Ok(OrchestratorMsg::Snapshot(tx)) => {
                    let _ = tx.send(self.snapshot_envelope());
                }
                Ok(OrchestratorMsg::State(tx)) => {
                    let _ = tx.send(self.round.clone());
                }
                Ok(OrchestratorMsg::Shutdown(done)) => {
                    let _ = done.send(());
                }
                Err(_) => break,
            }
        }
        self.final_save();
        info!("room {}: orchestrator stopped", self.room);
    }

    fn final_save(&mut self) {
        if let Some(round) = &self.round {
            if !round.is_finished() {
                if let Err(e) = self.store.save_current(round) {
                    error!("room {}: final save failed: {e}", self.room);
                }
            }
        }
        if let Err(e) = self.store.flush() {
            error!("room {}: flush failed: {e}", self.room);
        }
    }

    fn snapshot_envelope(&self) -> EventEnvelope {
        let phase = self.current_phase();
        let event = Event::PhaseChanged {
            old: None,
            new: phase,
        };
        // Snapshots ride outside the gap-free stream; they repeat the last
        // published ordinal the way heartbeats do.
        let seq = self.seq.saturating_sub(1);
        EventEnvelope::new(
            &self.room,
            self.round.as_ref().map(|r| r.round_id),
            seq,
            Some(phase),
            event,
        )
    }

    fn current_phase(&self) -> Phase {
        self.round
            .as_ref()
            .map(|r| r.phase)
            .unwrap_or(Phase::Preparation)
    }

    async fn handle_request(&mut self, req: CommandRequest) {
        metrics::inc_commands_processed();
        let result = self.apply(&req.command).await;
        if let Err(e) = &result {
            metrics::inc_commands_rejected();
            debug!("room {}: rejected {:?}: {e}", self.room, req.command);
        }
        req.respond(result);
    }

    /// Validate and apply one command; the single mutation point for the
    /// whole room.
    async fn apply(&mut self, command: &Command) -> Result<(), GameError> {
        match command {
            Command::StartNewRound { has_jackpot } => self.start_new_round(*has_jackpot).await,
            Command::DrawBall { kind, balls } => self.draw_balls(*kind, balls).await,
            Command::SelectExtraSide { side } => self.select_extra_side(*side).await,
            Command::NotifyJackpotWinner { subject_id } => {
                self.notify_jackpot_winner(subject_id.clone()).await
            }
            Command::AdvanceStage { force } => self.advance_stage(*force).await,
            Command::CancelRound { reason } => self.cancel_round(reason.clone()).await,
            Command::Reset {} => self.reset().await,
        }
    }

    async fn start_new_round(&mut self, has_jackpot: bool) -> Result<(), GameError> {
        let phase = self.current_phase();
        if !matches!(phase, Phase::Preparation | Phase::GameOver) {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "a round is already in progress".into(),
            });
        }
        let round = Round::new(self.room.clone(), has_jackpot);
        info!(
            "room {}: new round {} (jackpot: {has_jackpot})",
            self.room, round.round_id
        );
        self.round = Some(round);
        let mut events = vec![(Phase::Preparation, Event::RoundCreated { has_jackpot })];
        self.transition(Phase::NewRound, Some(Phase::Preparation), &mut events);
        self.commit(events).await;
        Ok(())
    }

    async fn draw_balls(&mut self, kind: BallKind, balls: &[BallDraw]) -> Result<(), GameError> {
        let phase = self.current_phase();
        let config = phase.config();
        if config.ball_draw != Some(kind) {
            return Err(GameError::InvalidPhase {
                phase,
                detail: format!("phase does not accept {kind:?} draws"),
            });
        }
        if balls.is_empty() {
            return Err(GameError::InvalidBall {
                detail: "empty ball list".into(),
            });
        }
        if self.round.is_none() {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "no live round".into(),
            });
        }

        let mut events: Vec<(Phase, Event)> = Vec::with_capacity(balls.len() + 1);
        let mut closed = false;
        let mut outcome = Ok(());
        // Entries validate independently, in order; a failure keeps the
        // balls already accepted.
        for draw in balls {
            if closed {
                outcome = Err(GameError::InvalidBall {
                    detail: "draw window closed by an earlier ball".into(),
                });
                break;
            }
            let round = self.round.as_mut().ok_or_else(|| GameError::Internal {
                detail: "round vanished mid-draw".into(),
            })?;
            match round.draw_ball(kind, draw.number, draw.is_last) {
                Ok((ball, window_closed)) => {
                    closed = window_closed;
                    events.push((phase, Event::BallDrawn { kind, ball }));
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if closed {
            let next = config.natural_successor;
            self.transition(next, Some(phase), &mut events);
        }
        self.commit(events).await;
        outcome
    }

    async fn select_extra_side(&mut self, side: ExtraSide) -> Result<(), GameError> {
        let phase = self.current_phase();
        if phase != Phase::ExtraBallSideSelectOpen {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "side selection is closed".into(),
            });
        }
        if let Some(round) = self.round.as_mut() {
            round.selected_extra_side = Some(side);
        }
        self.commit(vec![(phase, Event::ExtraSideSelected { side })])
            .await;
        Ok(())
    }

    async fn notify_jackpot_winner(&mut self, subject_id: String) -> Result<(), GameError> {
        let phase = self.current_phase();
        if !phase.in_jackpot_branch() {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "not in the jackpot sub-sequence".into(),
            });
        }
        let mut events = Vec::with_capacity(2);
        if let Some(round) = self.round.as_mut() {
            round.jackpot_winner = Some(subject_id.clone());
        }
        events.push((phase, Event::JackpotWinnerNotified { subject_id }));
        // A declared winner completes the jackpot draw window.
        if phase == Phase::JackpotDrawingStart {
            self.transition(Phase::JackpotDrawingClose, Some(phase), &mut events);
        }
        self.commit(events).await;
        Ok(())
    }

    async fn advance_stage(&mut self, force: bool) -> Result<(), GameError> {
        let phase = self.current_phase();
        let round_live = self.round.as_ref().is_some_and(|r| !r.is_finished());
        if !round_live {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "no round to advance".into(),
            });
        }
        let config = phase.config();
        if matches!(config.auto_advance, AutoAdvance::Manual) && !force {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "phase awaits dealer action; use force to skip".into(),
            });
        }

        let mut events = Vec::with_capacity(3);
        // Leaving side selection with no dealer choice picks one at random.
        if phase == Phase::ExtraBallSideSelectOpen {
            let side_missing = self
                .round
                .as_ref()
                .is_some_and(|r| r.selected_extra_side.is_none());
            if side_missing {
                let side = if rand::thread_rng().gen_bool(0.5) {
                    ExtraSide::Left
                } else {
                    ExtraSide::Right
                };
                if let Some(round) = self.round.as_mut() {
                    round.selected_extra_side = Some(side);
                }
                debug!("room {}: auto-selected extra side {side:?}", self.room);
                events.push((phase, Event::ExtraSideSelected { side }));
            }
        }

        let next = self
            .round
            .as_ref()
            .map(|r| phase.successor(r))
            .unwrap_or(config.natural_successor);
        self.transition(next, Some(phase), &mut events);
        self.commit(events).await;
        Ok(())
    }

    async fn cancel_round(&mut self, reason: String) -> Result<(), GameError> {
        let phase = self.current_phase();
        if !phase.config().cancellable {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "round cannot be cancelled in this phase".into(),
            });
        }
        let Some(mut round) = self.round.take() else {
            return Err(GameError::InvalidPhase {
                phase,
                detail: "no live round".into(),
            });
        };
        info!(
            "room {}: round {} cancelled: {}",
            self.room,
            round.round_id,
            escape_log(&reason)
        );
        round.cancel(reason.clone());
        round.next_seq = self.seq + 1;
        self.finalize(&round);
        self.timer = None;
        metrics::inc_rounds_cancelled();

        let env = EventEnvelope::new(
            &self.room,
            Some(round.round_id),
            self.seq,
            Some(phase),
            Event::RoundCancelled { reason },
        );
        self.seq += 1;
        self.hub.publish(env).await;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), GameError> {
        self.timer = None;
        let Some(round) = self.round.take() else {
            // Resetting an idle room is a no-op.
            return Ok(());
        };
        warn!(
            "room {}: operator reset, discarding round {}",
            self.room, round.round_id
        );
        let old = round.phase;
        if let Err(e) = self.store.clear_current(&self.room) {
            error!("room {}: clear on reset failed: {e}", self.room);
            metrics::inc_persistence_faults();
        }
        let env = EventEnvelope::new(
            &self.room,
            Some(round.round_id),
            self.seq,
            Some(Phase::Preparation),
            Event::PhaseChanged {
                old: Some(old),
                new: Phase::Preparation,
            },
        );
        self.seq += 1;
        self.hub.publish(env).await;
        Ok(())
    }

    /// Enter `next`, record the phase-change event, arm the new phase's
    /// timer, and run terminal side effects when the round completes.
    fn transition(&mut self, next: Phase, old: Option<Phase>, events: &mut Vec<(Phase, Event)>) {
        if let Some(round) = self.round.as_mut() {
            round.enter_phase(next);
        }
        events.push((next, Event::PhaseChanged { old, new: next }));
        self.timer = deadline_for(next);

        if next.is_terminal() {
            if let Some(round) = self.round.as_mut() {
                round.complete();
            }
            if let Some(round) = self.round.clone() {
                info!("room {}: round {} completed", self.room, round.round_id);
                self.finalize(&round);
                metrics::inc_rounds_completed();
            }
            events.push((next, Event::RoundCompleted {}));
            self.timer = None;
        }
    }

    /// Terminal bookkeeping: exactly-once history append and hot-slot
    /// clear, with a durability flush.
    fn finalize(&mut self, round: &Round) {
        if let Err(e) = self.store.append_history(round) {
            error!("room {}: history append failed: {e}", self.room);
            metrics::inc_persistence_faults();
        }
        if let Err(e) = self.store.clear_current(&self.room) {
            error!("room {}: clear current failed: {e}", self.room);
            metrics::inc_persistence_faults();
        }
        if let Err(e) = self.store.flush() {
            warn!("room {}: flush failed: {e}", self.room);
        }
    }

    /// Persist the mutated round, then publish the handler's events in
    /// order with consecutive ordinals. The persisted record carries the
    /// post-emission ordinal so a recovered stream continues without gaps;
    /// a save failure still lets the events reach subscribers.
    async fn commit(&mut self, events: Vec<(Phase, Event)>) {
        if events.is_empty() {
            return;
        }
        let round_id = self.round.as_ref().map(|r| r.round_id);
        let mut envelopes = Vec::with_capacity(events.len());
        for (phase, event) in events {
            let env = EventEnvelope::new(&self.room, round_id, self.seq, Some(phase), event);
            self.seq += 1;
            envelopes.push(env);
        }

        if let Some(round) = self.round.as_mut() {
            if !round.is_finished() {
                round.next_seq = self.seq;
                if let Err(e) = self.store.save_current(round) {
                    error!("room {}: persistence fault: {e}", self.room);
                    metrics::inc_persistence_faults();
                    round.recoverable = false;
                }
            }
        }

        for env in envelopes {
            self.hub.publish(env).await;
        }
    }
}

fn deadline_for(phase: Phase) -> Option<Instant> {
    match phase.config().auto_advance {
        AutoAdvance::After(d) => Some(Instant::now() + d),
        AutoAdvance::Manual => None,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
