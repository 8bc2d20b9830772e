use std::fmt;
use std::time::Duration;
use xray_tree_protocol::TracingHeader;

use crate::assembler::build_tree;
use crate::error::Result;
use crate::fetcher::{FetchConfig, TraceFetcher};
use crate::retry::{Acceptance, Assertion, Predicate, Retry, RetryObserver, RetryPolicy, Timeout};
use crate::source::TraceSource;
use crate::tree::{Tree, TreeOptions};

/// Main entry point: fetch trace trees from a backend, once or by polling.
///
/// Every call fetches and assembles from scratch; nothing is cached between
/// calls, so a client can be shared freely between threads.
///
/// # Example
/// ```
/// # use xray_tree::{MemoryTraceSource, SegmentBuilder, TraceId, TreeClient, TreeOptions};
/// let source = MemoryTraceSource::new();
/// source.ingest(
///     &TraceId::new("1-5f84c7a1-0123456789abcdef01234567"),
///     [SegmentBuilder::new("entry").origin("AWS::Lambda").into_document()],
/// );
///
/// let client = TreeClient::new(source);
/// let header = "Root=1-5f84c7a1-0123456789abcdef01234567;Sampled=1";
/// let matched = client
///     .retry_get_trace_tree_until_matches(header, &TreeOptions::default(), |tree| tree.leaf_count() == 1, 5.0)
///     .unwrap();
/// assert!(matched);
/// ```
pub struct TreeClient<S> {
    fetcher: TraceFetcher<S>,
    base_delay: Duration,
}

impl<S: TraceSource> TreeClient<S> {
    pub fn new(source: S) -> Self {
        Self::with_fetch_config(source, FetchConfig::default())
    }

    pub fn with_fetch_config(source: S, config: FetchConfig) -> Self {
        Self {
            fetcher: TraceFetcher::with_config(source, config),
            base_delay: RetryPolicy::DEFAULT_BASE_DELAY,
        }
    }

    /// Change the base delay of the polling backoff
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn fetcher(&self) -> &TraceFetcher<S> {
        &self.fetcher
    }

    /// Retry policy used by the polling methods for a given timeout
    pub fn policy(&self, timeout: Timeout) -> RetryPolicy {
        RetryPolicy::new(timeout).with_base_delay(self.base_delay)
    }

    /// Fetch and assemble the tree for a `Root=...;Parent=...;Sampled=...` header
    pub fn get_trace_tree(&self, header: &str, options: &TreeOptions) -> Result<Tree> {
        let header = TracingHeader::parse(header)?;
        self.get_trace_tree_for(&header, options)
    }

    pub fn get_trace_tree_for(&self, header: &TracingHeader, options: &TreeOptions) -> Result<Tree> {
        build_tree(&self.fetcher, header, options)
    }

    /// Poll until `assertion` accepts the tree or `timeout_secs` elapse
    /// (`0` polls forever).
    ///
    /// Returns `Ok(false)` on timeout. Missing or partially ingested data is
    /// retried; malformed headers, invalid timeouts and backend failures are
    /// returned as errors.
    pub fn retry_get_trace_tree_until<F, R>(
        &self,
        header: &str,
        options: &TreeOptions,
        assertion: F,
        timeout_secs: f64,
    ) -> Result<bool>
    where
        F: FnMut(&Tree) -> Result<(), R>,
        R: fmt::Display,
    {
        let header = TracingHeader::parse(header)?;
        let mut retry = Retry::new(self.policy(Timeout::from_secs_f64(timeout_secs)?));
        self.retry_get_trace_tree_with(&header, options, Assertion::new(assertion), &mut retry)
    }

    /// Like [`retry_get_trace_tree_until`](Self::retry_get_trace_tree_until)
    /// with a boolean predicate
    pub fn retry_get_trace_tree_until_matches<F>(
        &self,
        header: &str,
        options: &TreeOptions,
        predicate: F,
        timeout_secs: f64,
    ) -> Result<bool>
    where
        F: FnMut(&Tree) -> bool,
    {
        let header = TracingHeader::parse(header)?;
        let mut retry = Retry::new(self.policy(Timeout::from_secs_f64(timeout_secs)?));
        self.retry_get_trace_tree_with(&header, options, Predicate(predicate), &mut retry)
    }

    /// Poll with a caller-configured [`Retry`], e.g. one with a custom observer
    pub fn retry_get_trace_tree_with<A, O>(
        &self,
        header: &TracingHeader,
        options: &TreeOptions,
        accept: A,
        retry: &mut Retry<O>,
    ) -> Result<bool>
    where
        A: Acceptance<Tree>,
        O: RetryObserver,
    {
        tracing::debug!(%header, timeout = ?retry.policy().timeout, "waiting for trace tree");
        retry.run(|| self.get_trace_tree_for(header, options), accept)
    }
}
