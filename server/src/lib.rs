//! # Arena Server Library
//!
//! This library provides the authoritative server for a grid-based
//! multiplayer arena game. Players walk a tile world of walls and boxes,
//! drop bombs on their square and share the map with wandering enemies. The
//! server owns the only copy of the world; clients send key snapshots and
//! receive the full world state after every tick.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The world advances in fixed ticks. Each tick moves every character by its
//! pressed keys, places requested bombs and removes elements whose lifetime
//! ran out. Clients never report positions, only keys.
//!
//! ### User Management
//! Every connection that completes the handshake gets a user record and a
//! random auth token. Key updates are accepted only with a token of the
//! configured length that matches an active user.
//!
//! ### State Broadcasting
//! After each tick the tick number, every movable and every unmovable are
//! sent to all open connections as three consecutive frames.
//!
//! ## Architecture Design
//!
//! ### One Lock for the Game
//! World and users live behind a single async mutex. Connection tasks
//! decode messages without holding it; the tick task holds it for the
//! step and snapshot only, never while writing to sockets.
//!
//! ### Tasks per Connection
//! Each accepted TCP stream gets a reader task and a writer task. The writer
//! drains a bounded outbound queue, so a broadcast only enqueues and a peer
//! that stops reading is dropped once its queue fills. A rendezvous counter
//! tracks these tasks so shutdown can wait for every one of them.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! User records and auth-token issuing.
//!
//! ### Entity and Collision Modules (`entity`, `collision`)
//! Movable and unmovable world elements, same-square collision queries and
//! the swept movement used to stop characters in front of obstacles.
//!
//! ### World Module (`world`)
//! World generation, spawn selection and the per-tick step.
//!
//! ### Network Module (`network`)
//! Listener, connection lifecycle and broadcast over the shared stream codec.
//!
//! ### Game and Server Modules (`game`, `server`)
//! Glue between connections and the world, and the start/stop sequence.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::server::Server;
//! use shared::GameConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::start(GameConfig::default(), "127.0.0.1:8080").await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!
//!     Ok(())
//! }
//! ```

pub mod collision;
pub mod entity;
pub mod error;
pub mod game;
pub mod network;
pub mod rendezvous;
pub mod server;
pub mod session;
pub mod tick;
pub mod world;
