//! # Game server — process wiring and lifecycle
//!
//! Explicit constructor wiring at the process boundary: round store →
//! event hub → one orchestrator per configured room (with startup
//! recovery) → TCP session acceptor. No globals; every collaborator is
//! passed down.
//!
//! Shutdown order mirrors the ownership chain: stop accepting, signal
//! sessions to close with a short grace window, drain and stop the room
//! orchestrators (each performs a final save), then flush the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::game::orchestrator::{start_orchestrator, OrchestratorHandle};
use crate::hub::EventHub;
use crate::metrics;
use crate::session::{tcp, SessionDeps, StaticTokenValidator};
use crate::storage::{RoundStore, RoundStoreBuilder};

/// Grace window for sessions to flush their `BYE` frames at shutdown.
const SESSION_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How often the housekeeping tick prunes history.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);

pub struct GameServer {
    config: Config,
    store: RoundStore,
    hub: EventHub,
    rooms: Arc<HashMap<String, OrchestratorHandle>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GameServer {
    /// Open the store, start the hub, and recover every configured room —
    /// all before a single session is accepted.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = RoundStoreBuilder::new(&config.storage.data_dir)
            .current_ttl(ChronoDuration::hours(config.storage.current_ttl_hours))
            .history_retention(ChronoDuration::days(config.storage.history_retention_days))
            .open()
            .with_context(|| format!("opening store at {}", config.storage.data_dir))?;

        let hub = EventHub::start(config.hub.to_hub_settings());

        let mut rooms = HashMap::new();
        for room in &config.server.rooms {
            let handle = start_orchestrator(room, store.clone(), hub.clone())
                .with_context(|| format!("recovering room {room}"))?;
            rooms.insert(room.clone(), handle);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(GameServer {
            config,
            store,
            hub,
            rooms: Arc::new(rooms),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Accept sessions until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        let deps = SessionDeps {
            hub: self.hub.clone(),
            rooms: self.rooms.clone(),
            validator: Arc::new(StaticTokenValidator::new(self.config.auth.token_table())),
            config: self.config.session.to_session_settings(),
            shutdown: self.shutdown_rx.clone(),
        };

        let listener = TcpListener::bind(&self.config.server.bind)
            .await
            .with_context(|| format!("binding {}", self.config.server.bind))?;
        info!(
            "g38d serving {} room(s) on {}",
            self.rooms.len(),
            self.config.server.bind
        );

        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("connection from {peer}");
                            let conn_deps = deps.clone();
                            tokio::spawn(async move {
                                if let Err(e) = tcp::serve_connection(stream, conn_deps).await {
                                    info!("connection from {peer} ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("accept failed: {e}");
                        }
                    }
                }
                _ = housekeeping.tick() => {
                    match self.store.prune_history() {
                        Ok(0) => {}
                        Ok(n) => info!("pruned {n} expired history round(s)"),
                        Err(e) => error!("history prune failed: {e}"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        // Stop accepting happened by leaving the loop; now close sessions.
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(SESSION_CLOSE_GRACE).await;

        for (room, handle) in self.rooms.iter() {
            info!("stopping room {room}");
            handle.shutdown().await;
        }
        if let Err(e) = self.store.flush() {
            error!("final store flush failed: {e}");
        }
        info!("g38d shutdown complete");
    }

    /// Print per-room state and process counters.
    pub async fn show_status(&self) -> Result<()> {
        println!("g38d status — {} room(s)", self.rooms.len());
        for room in &self.config.server.rooms {
            let live = match self.rooms.get(room) {
                Some(handle) => handle.current_round().await,
                None => None,
            };
            let history = self.store.history_ids(room)?.len();
            match live {
                Some(round) => println!(
                    "  {room}: round {} in {:?} ({} regular / {} extra / {} lucky balls), {history} in history",
                    round.round_id,
                    round.phase,
                    round.regular.len(),
                    round.extra.len(),
                    round.lucky.len(),
                ),
                None => println!("  {room}: idle (Preparation), {history} in history"),
            }
            match self.store.get_lucky_balls(room)? {
                Some(balls) => println!(
                    "    lucky set: {:?}",
                    balls.iter().map(|b| b.number).collect::<Vec<_>>()
                ),
                None => println!("    lucky set: not seeded"),
            }
        }
        let snapshot = metrics::snapshot();
        println!(
            "  counters: {} commands ({} rejected), {} events, {} slow drops, {} persistence faults",
            snapshot.commands_processed,
            snapshot.commands_rejected,
            snapshot.events_dispatched,
            snapshot.subscribers_dropped_slow,
            snapshot.persistence_faults,
        );
        Ok(())
    }
}
