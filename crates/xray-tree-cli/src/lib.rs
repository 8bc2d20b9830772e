pub mod seed_data;

use anyhow::{bail, Context};
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use xray_tree::{MemoryTraceSource, RawTrace, Segment, TracingHeader, Tree, TreeClient, TreeOptions};

/// Environment variable overriding the polling base delay, in milliseconds
pub const BASE_DELAY_ENV: &str = "XRAY_TREE_BASE_DELAY_MS";

/// Fixture files hold either a plain array of traces or a saved
/// `aws xray batch-get-traces` response
#[derive(Deserialize)]
#[serde(untagged)]
enum Fixture {
    Traces(Vec<RawTrace>),
    BatchResponse {
        #[serde(rename = "Traces", alias = "traces")]
        traces: Vec<RawTrace>,
    },
}

pub fn parse_fixtures(json: &str) -> anyhow::Result<Vec<RawTrace>> {
    let fixture: Fixture = serde_json::from_str(json).context("fixture is neither a trace array nor a BatchGetTraces response")?;
    Ok(match fixture {
        Fixture::Traces(traces) | Fixture::BatchResponse { traces } => traces,
    })
}

/// Load a fixture file into an in-memory trace source
pub fn load_fixtures(path: &Path) -> anyhow::Result<MemoryTraceSource> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let traces = parse_fixtures(&json).with_context(|| format!("parsing {}", path.display()))?;
    tracing::info!(path = %path.display(), traces = traces.len(), "loaded fixtures");
    Ok(MemoryTraceSource::from_traces(traces))
}

/// Read the polling base delay from [`BASE_DELAY_ENV`], if set
pub fn base_delay_from_env() -> anyhow::Result<Option<Duration>> {
    parse_base_delay(std::env::var(BASE_DELAY_ENV).ok().as_deref())
}

fn parse_base_delay(value: Option<&str>) -> anyhow::Result<Option<Duration>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let millis: u64 = value
        .parse()
        .with_context(|| format!("{BASE_DELAY_ENV} must be a whole number of milliseconds, got {value:?}"))?;
    Ok(Some(Duration::from_millis(millis)))
}

/// What the `tree` subcommand should do
#[derive(Clone, Debug, Default)]
pub struct TreeRequest {
    pub header: String,
    pub options: TreeOptions,
    /// Poll for up to this many seconds (`0` polls forever)
    pub timeout: Option<f64>,
    /// Only accept trees with exactly this many paths
    pub expect_paths: Option<usize>,
    pub json: bool,
}

/// Fetch (or poll for) the requested tree and render it
pub fn run_tree(source: MemoryTraceSource, request: &TreeRequest, base_delay: Option<Duration>) -> anyhow::Result<String> {
    let mut client = TreeClient::new(source);
    if let Some(base_delay) = base_delay {
        client = client.with_base_delay(base_delay);
    }

    let tree = match request.timeout {
        None => {
            let tree = client.get_trace_tree(&request.header, &request.options)?;
            if let Some(expected) = request.expect_paths {
                if tree.leaf_count() != expected {
                    bail!("expected {expected} paths, found {}", tree.leaf_count());
                }
            }
            tree
        }
        Some(timeout) => {
            let mut accepted = None;
            let matched = client.retry_get_trace_tree_until(
                &request.header,
                &request.options,
                |tree: &Tree| match request.expect_paths {
                    Some(expected) if tree.leaf_count() != expected => {
                        Err(format!("expected {expected} paths, found {}", tree.leaf_count()))
                    }
                    _ => {
                        accepted = Some(tree.clone());
                        Ok(())
                    }
                },
                timeout,
            )?;
            match accepted {
                Some(tree) if matched => tree,
                _ => bail!("no matching tree for {} within {timeout}s", request.header),
            }
        }
    };

    if request.json {
        Ok(serde_json::to_string_pretty(&tree.output())?)
    } else {
        Ok(render_paths(&tree))
    }
}

/// Human-readable listing of every path in the tree
pub fn render_paths(tree: &Tree) -> String {
    let mut out = String::new();
    let source = tree.source_trace();
    let _ = writeln!(
        out,
        "trace {} ({} segments, {} paths)",
        source.id,
        source.segment_count(),
        tree.leaf_count()
    );
    if let Some(started) = tree.root().start_time.to_offset_datetime().and_then(|t| t.format(&Rfc3339).ok()) {
        let _ = writeln!(out, "started {started}");
    }

    for (i, path) in tree.paths().iter().enumerate() {
        let hops: Vec<String> = path.iter().map(|segment| describe(segment)).collect();
        let _ = writeln!(out, "  [{}] {}", i + 1, hops.join(" -> "));
    }

    for link in tree.unresolved_links() {
        let _ = writeln!(
            out,
            "  unresolved link from {} to {} ({:?})",
            link.segment_id, link.trace_id, link.reason
        );
    }
    if tree.is_possibly_incomplete() {
        let _ = writeln!(out, "  warning: tree may be incomplete");
    }
    out
}

fn describe(segment: &Segment) -> String {
    let mut text = match &segment.origin {
        Some(origin) => format!("{} [{origin}]", segment.name),
        None => segment.name.clone(),
    };
    if segment.is_in_progress() {
        text.push_str(" (in progress)");
    } else if segment.has_errors() {
        text.push_str(" (error)");
    }
    text
}

/// Header for a fresh, sampled trace
pub fn new_header() -> TracingHeader {
    TracingHeader::new_sampled()
}
