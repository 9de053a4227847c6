//! Hiring pipeline backend: phases, workflows, stage transitions, and
//! funnel analytics for candidate applications.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod telemetry;
