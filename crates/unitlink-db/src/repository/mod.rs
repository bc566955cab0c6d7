//! # Repository Module
//!
//! Database repository implementations for unitlink.
//!
//! ## Available Repositories
//!
//! - [`OfflineQueueRepository`](queue::OfflineQueueRepository) - Durable offline write queue

pub mod queue;
