//! Profile-dispatched worker agents

mod profile;
mod result;
mod runner;

pub use profile::{system_prompt, tools_for};
pub use result::WorkerReport;
pub use runner::{Worker, WorkerError};
