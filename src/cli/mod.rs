//! Command workflows, independent of argument parsing.

pub mod orchestration;

pub use orchestration::{FinishKind, FinishPlan, FlowContext, ForkPlan, InitOutcome, StatusReport};
