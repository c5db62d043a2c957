//! Backend service categories.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedError;

/// One of the microservices behind the API.
///
/// Each category has its own rate limit on the server side, so it also owns
/// an independent throttle clock on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Compute,
    Reservations,
    Status,
    Storage,
    Tasks,
    Utilities,
}

impl ServiceCategory {
    /// Every category, in a stable order.
    pub const ALL: [ServiceCategory; 6] = [
        ServiceCategory::Compute,
        ServiceCategory::Reservations,
        ServiceCategory::Status,
        ServiceCategory::Storage,
        ServiceCategory::Tasks,
        ServiceCategory::Utilities,
    ];

    /// Lowercase name, as it appears in endpoint paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Reservations => "reservations",
            Self::Status => "status",
            Self::Storage => "storage",
            Self::Tasks => "tasks",
            Self::Utilities => "utilities",
        }
    }

    /// Category of an endpoint path, taken from its first segment.
    ///
    /// `/compute/jobs` and `compute/jobs` both map to [`ServiceCategory::Compute`].
    pub fn from_path(path: &str) -> Option<Self> {
        let segment = path.trim_start_matches('/').split(['/', '?']).next()?;
        segment.parse().ok()
    }

    /// Minimum spacing between two calls when nothing else is configured.
    pub fn default_interval(&self) -> Duration {
        match self {
            Self::Compute => Duration::from_secs(1),
            _ => Duration::from_millis(100),
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SchedError::InvalidRequest(format!("unknown service category: {s}")))
    }
}
