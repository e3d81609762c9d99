//! The per-run dispatch loop

mod engine;

pub use engine::DispatchLoop;
