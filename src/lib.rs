//! Conveyor — durable multi-worker job workflow engine.
//!
//! Jobs are documents in a shared store; independent worker processes
//! compete to drive each job's task sequence forward. Mutual exclusion
//! is achieved entirely through revision-checked conditional writes.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod model;
pub mod observer;
pub mod runner;
pub mod store;
