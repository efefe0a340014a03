//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is alive.
//!
//! # Tasks
//! - Eviction sweep: trims a store back to half its size bound

mod cleanup;

pub use cleanup::spawn_cleanup_task;
