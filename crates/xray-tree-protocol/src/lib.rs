//! Protocol definitions for X-Ray trace trees.
//!
//! This crate defines the segment model, the tracing header and the raw wire
//! documents returned by the tracing backend, plus the single normalization
//! step that turns the latter into the former.

pub mod raw;
pub mod segment;
pub mod trace_context;

pub use raw::*;
pub use segment::*;
pub use trace_context::*;
