//! Error types for the simulation engine

use thiserror::Error;

/// Core error type for simulation operations
#[derive(Error, Debug)]
pub enum SimError {
    #[error("empty trace: {0}")]
    EmptyTrace(String),

    #[error("trace records out of order at index {0}")]
    UnsortedTrace(usize),

    #[error("trace records overlap at index {0}")]
    OverlappingTrace(usize),

    #[error("configuration error: {0}")]
    Config(String),
}
