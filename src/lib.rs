pub mod classifier;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod git;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod tagger;
pub mod ui;
pub mod warning;

pub use error::{FlowError, Result};
