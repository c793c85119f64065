pub mod analysis;
pub mod bode;
pub mod circuit;
pub mod cli;
pub mod demos;
pub mod error;
pub mod ngspice;
pub mod rawfile;
pub mod simulator;
pub mod theory;
pub mod units;

// Re-export commonly used types
pub use analysis::{AcAnalysis, AnalysisResult, OperatingPoint};
pub use bode::{BodeDiagram, BodeSeries};
pub use circuit::{Circuit, Component, Node, Sinusoid};
pub use error::SimulationError;
pub use ngspice::{NgspiceConfig, NgspiceEngine};
pub use simulator::{AcSweep, Engine, ReplayEngine, Simulator, SimulatorConfig, Variation};

// Error types
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
