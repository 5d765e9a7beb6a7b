//! # hotplug engine
//!
//! Drives one device transition from rule application to the last queued
//! command.
//!
//! ### Key Submodules:
//! - `executor`: ordered remove and add/change paths plus run-list execution
//! - `collaborators`: traits for the rule engine, builtins and node management
//! - `rules`: a fixed rule outcome for offline runs
//! - `dry_run`: collaborators that only record what they would do

pub mod collaborators;
pub mod dry_run;
pub mod error;
pub mod executor;
pub mod rules;

pub use collaborators::{Builtins, NodeManager, RuleApplier};
pub use error::ExecuteError;
pub use executor::{EventExecutor, RunSummary};
pub use rules::{RuleSet, StaticRules};
