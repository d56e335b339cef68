//! Process execution and result recording for Quarry.
//!
//! - [`missing_dependencies`] probes declared tools against PATH
//! - [`ProcessExecutor`] runs one job as a child process under a deadline
//! - [`ResultRecorder`] persists one JSON record per execution plus a
//!   rotating plaintext log

mod deps;
mod executor;
mod recorder;

pub use deps::missing_dependencies;
pub use executor::{ENV_RUNNER_ID, ENV_WORKSPACE, MAX_CAPTURE_BYTES, ProcessExecutor};
pub use recorder::{RecordError, ResultRecorder};
