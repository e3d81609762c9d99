//! The director: decomposition, plan integration, readiness, Phoenix
//! retry, and human-escalation gating

mod core;
mod decompose;
mod integrate;

pub use core::{Director, DirectorReport};
pub use decompose::decompose;
pub use integrate::{integrate, IntegrationChanges};
