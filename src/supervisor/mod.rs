mod log_sink;
mod output;
mod runner;
mod state;

pub use output::OutputCallback;
pub use runner::{ProcessSupervisor, StateCallback};
pub use state::ProcessState;
