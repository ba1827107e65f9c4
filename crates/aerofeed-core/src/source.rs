use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Airport feed formats understood by [`FlightRecord::from_source_data`](crate::FlightRecord::from_source_data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Single feed, `{"data": [...]}`, direction implied by which airport field is set.
    Sfo,
    /// Dual feed, `{"list": [...]}` per direction.
    Yyz,
    /// Single feed, `{"flights": [...]}`, explicit `A`/`D` flag.
    Mia,
}

impl SourceKind {
    pub const ALL: [Self; 3] = [Self::Sfo, Self::Yyz, Self::Mia];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sfo => "sfo",
            Self::Yyz => "yyz",
            Self::Mia => "mia",
        }
    }

    /// Whether the feed is split into a departures and an arrivals query.
    pub const fn is_dual_feed(self) -> bool {
        matches!(self, Self::Yyz)
    }

    /// Top-level key holding the record array.
    pub const fn records_field(self) -> &'static str {
        match self {
            Self::Sfo => "data",
            Self::Yyz => "list",
            Self::Mia => "flights",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sfo" => Ok(Self::Sfo),
            "yyz" => Ok(Self::Yyz),
            "mia" => Ok(Self::Mia),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
