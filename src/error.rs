//! Error types for running analyses through the external engine.

use std::time::Duration;

use thiserror::Error;

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimulationError>;

/// Errors raised while handing a deck to the engine or reading its results.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// ngspice is not installed or not found in PATH.
    #[error("ngspice not found: {0}")]
    EngineNotFound(String),

    /// The engine ran but reported a failure (bad deck, no convergence, ...).
    #[error("ngspice failed ({status}): {diagnostics}")]
    EngineFailed { status: String, diagnostics: String },

    #[error("ngspice timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to parse ngspice rawfile.
    #[error("failed to parse rawfile: {0}")]
    RawfileParse(String),

    /// The engine did not return the requested kind of analysis.
    #[error("unsupported analysis: {0}")]
    UnsupportedAnalysis(String),

    /// A node or branch was asked for that the results do not contain.
    #[error("not found in results: {0}")]
    MissingSignal(String),

    #[error("invalid AC sweep: {0}")]
    InvalidSweep(String),

    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
