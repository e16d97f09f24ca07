//! # Development Relay
//!
//! A small publish/subscribe relay with presence tracking, speaking the
//! bincode `Packet` protocol from the `shared` crate over UDP. It stands in for
//! the hosted realtime service during development and in integration tests;
//! it has no game knowledge at all.
//!
//! ## Core Responsibilities
//!
//! ### Channel Routing
//! Clients subscribe to named channels. A `Publish` is forwarded to every
//! other subscriber of the channel; the sender never receives its own event.
//!
//! ### Presence
//! Each subscriber may track one presence record per channel. Whenever the
//! membership of a channel changes (track, unsubscribe, disconnect, timeout)
//! every subscriber receives the full snapshot.
//!
//! ### Client Management
//! Handles the lifecycle of client connections:
//! - Connection establishment and id assignment
//! - Capacity limits
//! - Heartbeat-based timeout detection and cleanup
//!
//! ## Architecture Design
//!
//! The relay uses a single event loop for all routing decisions, fed by
//! internal async tasks:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes the outgoing packet queue
//! - **Timeout Checker**: Removes clients that stopped sending heartbeats
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", 64, Duration::from_secs(5)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
