//! # hotplug-core
//!
//! Foundation layer for device-transition processing.
//!
//! ### Key Submodules:
//! - `device`: the device abstraction consumed by the executor, plus an
//!   in-memory implementation backed by a shared database
//! - `event`: the per-transition accumulator that rule application, template
//!   expansion and the run-list executor all operate on
//! - `builtin`: identifiers of in-process builtin commands
//! - `netlink`: the lazily opened link-control handle owned by an event
//! - `time`: monotonic microsecond clock used for initialization stamps

pub mod builtin;
pub mod device;
pub mod error;
pub mod event;
pub mod netlink;
pub mod paths;
pub mod time;

pub use device::{Action, DevNum, Device};
pub use error::DeviceError;
pub use event::Event;
