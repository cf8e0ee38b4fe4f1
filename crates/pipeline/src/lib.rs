//! The pipeline engine: CAPTCHA-solve retry loop plus the staged
//! navigation machine that turns one target's page into a
//! [`slotwatch_core::PipelineResult`].

pub mod engine;
pub mod solver;

pub use engine::{Engine, PipelineSettings};
pub use solver::CommandSolver;
