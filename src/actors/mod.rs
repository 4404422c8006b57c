//! Background actors
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels. The monitoring pipeline itself runs in the scheduler's worker
//! pool; actors take work off that path.
//!
//! ## Architecture Overview
//!
//! ```text
//!   pipeline (per instance) ──try_send──▶ record queue ──▶ StorageActor ──▶ StorageBackend
//!                                                            ▲
//!   StorageHandle ───────────commands (mpsc + oneshot)───────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Records**: bounded mpsc queue, written with `try_send`
//! 2. **Commands**: mpsc command channel per actor
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod messages;
pub mod storage;
