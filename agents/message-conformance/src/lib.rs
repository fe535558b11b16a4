//! Message Conformance Agent
//!
//! Validates yesterday's archived messages of every catalogued topic against
//! the topic's JSON Schema, files one ticket per non-conforming topic and
//! schema, and publishes every distinct issue.
//!
//! # Invocation
//! 1. [`catalog`] discovers topic-schema bindings from the data catalogs.
//! 2. `conform_core` validates each topic within its share of the budget.
//! 3. [`tickets`] creates tickets or comments on existing ones.
//! 4. [`publish`] sends every distinct issue to the issues topic.
//!
//! # Design Principles
//! - Stateless: nothing survives an invocation except tickets and published issues
//! - Injected: every cloud service is reached through a trait built by [`runner::ServiceConnector`]
//! - Idempotent filing: comments carry a signature so reruns skip known errors

pub mod catalog;
pub mod cli;
pub mod client;
pub mod config;
pub mod handler;
pub mod publish;
pub mod runner;
pub mod telemetry;
pub mod tickets;

// Re-export contracts
#[path = "../contracts/mod.rs"]
pub mod contracts;

pub use contracts::*;
