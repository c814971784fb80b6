//! DesignCore SDK
//!
//! Shared types and errors for the DesignCore client.
//! This crate is used by the engine and its integration tests.

/// Error types and handling
pub mod errors;

/// Wire and domain types
pub mod types;

// Re-export commonly used types
pub use errors::{ClientError, ErrorExt};
pub use types::{
    ContentSlot, GenerationSettings, ImageRecord, ProjectMetadata, ProjectSnapshot,
    ProjectStatus, ProjectSummary, StepContents, StepContext, StepEnvelope, StepId, StepRequest,
};
