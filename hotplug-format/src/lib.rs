//! # hotplug-format
//!
//! Template substitution for rule-supplied strings.
//!
//! A template is scanned left to right. `$name` and `%c` introduce a
//! substitution from a fixed table, optionally followed by a `{qualifier}`;
//! `$$` and `%%` produce the sigil itself. Output is bounded by a capacity
//! that counts a terminator, so at most `capacity - 1` bytes are produced and
//! the last substitution may be cut short.

mod buffer;
pub mod chars;
mod expand;
pub mod table;

pub use buffer::BoundedString;
pub use expand::{expand, NAME_SIZE, PATH_SIZE};
pub use table::{SubstKind, Substitution, SUBSTITUTIONS};
