//! Engine API version negotiation
//!
//! The manager reports the highest API version its engine speaks. The operator
//! may pin a lower one. We always talk the lower of the two, compared
//! numerically on (major, minor).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

use crate::client::ManagerApi;

/// API version used when negotiation fails and the operator pinned nothing
pub const DEFAULT_API_VERSION: ApiVersion = ApiVersion::new(1, 41);

#[derive(Error, Debug, PartialEq)]
#[error("Invalid API version '{0}'")]
pub struct VersionParseError(pub String);

/// A Docker engine API version such as `v1.45`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// URL path prefix, e.g. `v1.45`
    pub fn prefix(&self) -> String {
        self.to_string()
    }
}

impl FromStr for ApiVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let raw = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut parts = raw.splitn(2, '.');

        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| VersionParseError(s.to_string()))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| VersionParseError(s.to_string()))?,
            None => 0,
        };

        Ok(Self { major, minor })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
    }
}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pick the version to speak given what the engine supports.
///
/// Never goes above the engine, never overrides a lower operator choice.
pub fn select_version(engine: ApiVersion, requested: Option<ApiVersion>) -> ApiVersion {
    match requested {
        Some(requested) => requested.min(engine),
        None => engine,
    }
}

/// Query the manager's engine version and negotiate against `requested`.
///
/// Any failure falls back to `fallback`; the service keeps running.
pub async fn negotiate<M: ManagerApi + ?Sized>(
    manager: &M,
    requested: Option<ApiVersion>,
    fallback: ApiVersion,
) -> ApiVersion {
    let engine = match manager.version().await {
        Ok(doc) => doc.api_version.as_deref().map(ApiVersion::from_str),
        Err(e) => {
            warn!(fallback = %fallback, error = %e, "Version query failed, using default API version");
            return fallback;
        }
    };

    match engine {
        Some(Ok(engine)) => {
            let selected = select_version(engine, requested);
            info!(engine = %engine, selected = %selected, "Negotiated API version");
            selected
        }
        Some(Err(e)) => {
            warn!(fallback = %fallback, error = %e, "Engine reported an unparseable API version");
            fallback
        }
        None => {
            warn!(fallback = %fallback, "Engine did not report an API version");
            fallback
        }
    }
}
