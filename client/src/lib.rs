//! # Match Coordination Client
//!
//! This library implements the realtime coordination core shared by the
//! classroom's two-player game modes: a timed trivia battle, a word-relay
//! drawing game and online draughts. It sits on top of an externally provided
//! publish/subscribe transport with presence tracking and contains no server
//! of its own.
//!
//! ## Architecture Overview
//!
//! Every player runs the same code. There is no referee; agreement comes from
//! running identical pure functions over identical inputs.
//!
//! ### Lobby and Pairing
//! Players announce themselves on a shared lobby channel with a join timestamp.
//! Each presence snapshot is fed through a deterministic pairing function, so
//! every peer derives the same pairs and the same host without negotiation.
//!
//! ### Host Authority
//! The host alone generates the random parts of a match (questions, chain
//! order, seating) and broadcasts them once in `START`. The guest adopts them
//! verbatim.
//!
//! ### Phase Machine
//! A generic round driver advances each peer's copy of the match once every
//! required player is done, by acting or by running out of time. Game modes
//! plug in through a small adapter trait.
//!
//! ## Module Organization
//!
//! - `transport`: the pub/sub seam plus loopback and UDP adapters
//! - `lobby`, `matchmaker`: presence bookkeeping and pure pairing
//! - `session`, `host`: the private match channel and shared content
//! - `phase`, `adapters`: round driver and the three game modes
//! - `coordinator`, `controller`: glue and input sources
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::adapters::BattleMode;
//! use client::config::MatchConfig;
//! use client::controller::BattleBot;
//! use client::coordinator::Coordinator;
//! use client::transport::UdpTransport;
//! use shared::{now_millis, PresenceRecord};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MatchConfig::default();
//!     let (transport, mut events) = UdpTransport::connect("127.0.0.1:8080").await?;
//!     let record = PresenceRecord::new("amy", "Amy", now_millis());
//!
//!     let mut coordinator = Coordinator::new(transport, BattleMode::new(config.battle), record, 7);
//!     coordinator.join_lobby()?;
//!
//!     let mut bot = BattleBot::new(7, 0.6, 4);
//!     let result = coordinator
//!         .run(&mut events, &mut bot, Duration::from_millis(config.tick_millis))
//!         .await?;
//!     println!("won: {}, score: {}", result.won, result.score);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod lobby;
pub mod matchmaker;
pub mod phase;
pub mod session;
pub mod transport;
