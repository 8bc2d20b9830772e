use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// X-Ray trace ID.
///
/// The format is opaque to the tree engine: it is only ever passed back to the
/// tracing backend, so any non-empty string is accepted.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh trace ID in X-Ray format: `1-{epoch secs}-{96 random bits}`
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        getrandom::getrandom(&mut bytes).expect("failed to generate random trace ID");
        let epoch = time::OffsetDateTime::now_utc().unix_timestamp() as u32;
        Self(format!("1-{:08x}-{}", epoch, hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self.0)
    }
}

impl From<&str> for TraceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TraceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// X-Ray tracing header: `Root={trace_id};Parent={segment_id};Sampled={0|1}`
///
/// Only `Root` is required. Keys are matched case-insensitively and unknown
/// keys (`Lineage`, `Self`, ...) are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracingHeader {
    pub root: TraceId,
    /// Segment ID of the upstream caller, if it propagated one
    pub parent: Option<String>,
    /// Sampling decision; `None` when absent or `?`
    pub sampled: Option<bool>,
}

impl TracingHeader {
    /// Header for a brand new sampled trace, suitable for injecting into an
    /// instrumented client call
    pub fn new_sampled() -> Self {
        Self::sampled(TraceId::generate())
    }

    pub fn sampled(root: TraceId) -> Self {
        Self {
            root,
            parent: None,
            sampled: Some(true),
        }
    }

    pub fn parse(header: &str) -> Result<Self, HeaderError> {
        let mut root = None;
        let mut parent = None;
        let mut sampled = None;

        for component in header.split(';') {
            let Some((key, value)) = component.split_once('=') else {
                if root.is_none() && component.trim().eq_ignore_ascii_case("root") {
                    return Err(HeaderError::EmptyRoot);
                }
                continue;
            };
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                // First Root wins, like the X-Ray SDKs; later ones are not inspected
                "root" if root.is_none() => {
                    if value.is_empty() {
                        return Err(HeaderError::EmptyRoot);
                    }
                    root = Some(TraceId::new(value));
                }
                "parent" if !value.is_empty() => parent = Some(value.to_string()),
                "sampled" => {
                    sampled = match value {
                        "1" => Some(true),
                        "0" => Some(false),
                        _ => None,
                    }
                }
                _ => {}
            }
        }

        let root = root.ok_or(HeaderError::MissingRoot)?;
        Ok(Self {
            root,
            parent,
            sampled,
        })
    }
}

impl FromStr for TracingHeader {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TracingHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root={}", self.root)?;
        if let Some(parent) = &self.parent {
            write!(f, ";Parent={}", parent)?;
        }
        match self.sampled {
            Some(true) => f.write_str(";Sampled=1"),
            Some(false) => f.write_str(";Sampled=0"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("tracing header has no Root component")]
    MissingRoot,
    #[error("tracing header has an empty Root component")]
    EmptyRoot,
}
