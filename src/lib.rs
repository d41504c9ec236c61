//! # g38d - Game-Flow Orchestrator for the G38 Live Bingo/Lottery Service
//!
//! g38d is the authoritative game-flow daemon: a single process owns, per
//! room, the canonical state of one in-progress bingo round, drives it
//! through a fixed phase sequence on timers and dealer commands, persists
//! every transition, and fans the resulting events out to connected
//! dealer and player sessions in real time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   commands   ┌──────────────────┐   save    ┌───────────┐
//! │   Sessions   │─────────────→│  Orchestrator    │──────────→│   Store   │
//! │ (per peer)   │              │  (per room,      │           │  (sled)   │
//! └──────────────┘              │   single writer) │           └───────────┘
//!        ↑                      └──────────────────┘
//!        │        events                │
//!        └───────────────┐              ▼
//!                 ┌──────────────────────────┐
//!                 │        Event Hub         │
//!                 │ (fan-out, heartbeats,    │
//!                 │  back-pressure, age cap) │
//!                 └──────────────────────────┘
//! ```
//!
//! Each room's orchestrator is a single-writer actor: every round
//! mutation — dealer ball draws, stage advances, timer fires, cancels —
//! goes through one serialized command queue, which is what makes ball
//! uniqueness, phase legality and event ordering tractable. Everything
//! else sees rounds only as immutable snapshots on events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use g38d::config::Config;
//! use g38d::server::GameServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("g38d.toml").await?;
//!     let mut server = GameServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`game`] - Phase table, round entity, commands, events, and the
//!   per-room orchestrator
//! - [`hub`] - Subscription registry and event fan-out
//! - [`session`] - Framing-agnostic sessions plus the TCP JSON-lines binding
//! - [`storage`] - Sled-backed round store (hot live slot + history)
//! - [`server`] - Process wiring, recovery, and lifecycle
//! - [`config`] - TOML configuration management

pub mod config;
pub mod game;
pub mod hub;
pub mod logutil;
pub mod metrics;
pub mod server;
pub mod session;
pub mod storage;
