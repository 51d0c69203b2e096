pub mod simulate;

pub use simulate::{LatencySummary, SimulateOptions, SimulationReport, run_simulation};
