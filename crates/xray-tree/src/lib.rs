//! Reconstruct AWS X-Ray traces as trees of segments and poll them until
//! they look the way a test expects.
//!
//! A trace is fetched from a [`TraceSource`], its segments are linked into a
//! tree by parent ID (optionally following `child` links into other traces)
//! and the tree is flattened into root-to-leaf paths. Tracing backends are
//! eventually consistent, so the polling helpers keep refetching until an
//! acceptance check passes or a timeout elapses.
//!
//! # Example
//!
//! ```no_run
//! use xray_tree::{MemoryTraceSource, TreeClient, TreeOptions};
//!
//! fn main() -> Result<(), xray_tree::Error> {
//!     let client = TreeClient::new(MemoryTraceSource::new());
//!     let options = TreeOptions::new().with_child_traces(true);
//!
//!     // Wait up to 30 seconds for three complete execution paths
//!     let complete = client.retry_get_trace_tree_until(
//!         "Root=1-5f84c7a1-0123456789abcdef01234567;Sampled=1",
//!         &options,
//!         |tree| match tree.leaf_count() {
//!             3 => Ok(()),
//!             n => Err(format!("expected 3 paths, found {n}")),
//!         },
//!         30.0,
//!     )?;
//!
//!     assert!(complete);
//!     Ok(())
//! }
//! ```

mod assembler;
mod client;
mod error;
mod fetcher;
mod memory;
mod paths;
pub mod retry;
mod segment_builder;
mod source;
mod tree;

pub use xray_tree_protocol::*;
pub use assembler::build_tree;
pub use client::TreeClient;
pub use error::{Error, Result};
pub use fetcher::{FetchConfig, TraceFetcher};
pub use memory::MemoryTraceSource;
pub use retry::{retry_until, retry_until_asserted, Retry, RetryError, RetryPolicy, Timeout, Transient};
pub use segment_builder::SegmentBuilder;
pub use source::{BatchGetTraces, SourceError, TraceSource};
pub use tree::{NodeId, OrphanPolicy, Tree, TreeNode, TreeOptions, TreeOutput, UnresolvedLink, UnresolvedReason};
