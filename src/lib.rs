//! # CapOrSlap Game Server
//!
//! Authoritative server for CapOrSlap, a higher-or-lower streak game over
//! token market caps.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CAP OR SLAP SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seed-derived Xorshift128+ streams         │
//! │  └── clock.rs    - Injectable wall clock                     │
//! │                                                              │
//! │  game/           - Game rules (pure)                         │
//! │  ├── catalog.rs  - Item snapshot                             │
//! │  ├── sequencer.rs- Seeded pair selection                     │
//! │  ├── difficulty.rs / timer.rs - Tiers and think-time         │
//! │  ├── run.rs      - Run record and guess log                  │
//! │  ├── validator.rs- Guess and submission checks               │
//! │  └── reprieve.rs - Continue-after-loss offer                 │
//! │                                                              │
//! │  store/          - Key-value store, run records              │
//! │  leaderboard/    - Streak boards and overtakes               │
//! │  verify/         - Share and payment proofs                  │
//! │  service.rs      - Operation orchestration                   │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - JSON envelopes                            │
//! │  └── auth.rs     - JWT validation                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! Every hidden item is drawn from a stream derived from the run seed and the
//! round number, so a run can be replayed from its seed and guess log:
//! - No ambient randomness in `game/`
//! - No wall clock in `game/` (timestamps are passed in)
//! - Catalog iteration follows load order
//!
//! The server keeps the authoritative record of every run. Clients only ever
//! learn the hidden item's value after guessing.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod game;
pub mod leaderboard;
pub mod network;
pub mod service;
pub mod store;
pub mod verify;

// Re-export commonly used types
pub use config::{ConfigError, GameConfig, ServerConfig};
pub use crate::core::rng::SeededStream;
pub use error::{GameError, GameResult, Severity};
pub use game::{Catalog, Guess, Item, RunRecord};
pub use service::GameService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
