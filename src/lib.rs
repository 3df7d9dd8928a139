//! polymath: time-boxed knowledge acquisition jobs.
//!
//! Jobs learn concepts through research and a failover chain of text
//! providers, persist every snapshot, and stream progress to subscribers.

pub mod api;
pub mod app;
pub mod categorizer;
pub mod cli;
pub mod concept;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod learner;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod research;
pub mod rethink;
pub mod state_machine;
pub mod store;
pub mod ui;
pub mod worker;
