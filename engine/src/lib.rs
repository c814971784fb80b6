//! DesignCore Engine Library
//!
//! This library provides the client core for the DesignCore generation
//! pipeline. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Generation backend abstraction and HTTP client
pub mod backend;

/// Message bus for inter-component communication
pub mod message_bus;

/// Viewed-project state with stale-write rejection
pub mod store;

/// Poll loops for the viewed project and the project list
pub mod poller;

/// Single-step execution, buffered or streamed
pub mod executor;

/// Run-all orchestration
pub mod sequencer;

/// Content interpretation: structured data or prose
pub mod interpreter;

/// Content-shape view dispatch and terminal rendering
pub mod presenter;

/// Dashboard controller and view modes
pub mod dashboard;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
