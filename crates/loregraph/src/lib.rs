//! Loregraph - versioned long-term memory graph for AI agents
//!
//! Entities keep an immutable version history, edges pin the exact states
//! they were written against, and every agent edit can be reviewed, diffed
//! and rolled back by a human before it becomes permanent.

pub mod admin;
pub mod api;
pub mod config;
pub mod error;
pub mod graph;
pub mod maintenance;
pub mod review;
pub mod service;
pub mod storage;
pub mod testing;

pub use error::{LoreError, Result};
pub use service::MemoryGraph;
