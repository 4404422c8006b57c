//! Storage backends for snapshot and alert persistence
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Batch-oriented**: Writes arrive in batches from the storage actor
//!
//! ## Backends
//!
//! - **In-Memory** (default): Ring buffer per instance, no persistence
//! - **SQLite** (`storage-sqlite` feature): Embedded database
//!
//! ## Usage
//!
//! ```no_run
//! use fleetwatch::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./fleetwatch.db").await?;
//!     let health = backend.health_check().await?;
//!     println!("{}", health.message);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{CleanupReport, HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
