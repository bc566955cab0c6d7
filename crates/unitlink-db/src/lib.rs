//! # unitlink-db: Offline Queue Storage
//!
//! This crate persists the offline write queue in a local SQLite file so
//! queued writes survive an application restart.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        unitlink Data Flow                               │
//! │                                                                         │
//! │  OfflineQueue (unitlink-sync)                                          │
//! │       │  enqueue / drain / discard                                      │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   unitlink-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repository       │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │◄───│   (queue.rs)       │  │ (embedded) │  │   │
//! │  │   │  SqlitePool   │    │ OfflineQueueRepo   │  │ 001_*.sql  │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file in the platform data directory                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use unitlink_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/unitlink.db")).await?;
//! let pending = db.offline_queue().list_drainable().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::queue::{Enqueued, OfflineQueueRepository, QueueCounts};
