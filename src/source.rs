//! Source identities shared by the stores, pipelines, merge engine and orchestrator

use std::fmt;
use std::str::FromStr;

/// One independent external data origin with its own cadence and tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Bifrost,
    Hydration,
    HydrationPrice,
    Stellaswap,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Bifrost,
        SourceKind::Hydration,
        SourceKind::HydrationPrice,
        SourceKind::Stellaswap,
    ];

    /// Stable label written to batch-tracking rows and heartbeats
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Bifrost => "bifrost",
            SourceKind::Hydration => "hydration",
            SourceKind::HydrationPrice => "hydration_price",
            SourceKind::Stellaswap => "stellaswap",
        }
    }

    /// Chain the source's data belongs to
    pub fn chain(&self) -> &'static str {
        match self {
            SourceKind::Bifrost => "bifrost",
            SourceKind::Hydration | SourceKind::HydrationPrice => "hydration",
            SourceKind::Stellaswap => "moonbeam",
        }
    }

    /// Key used for this source inside the unified snapshot payload
    pub fn payload_key(&self) -> &'static str {
        match self {
            SourceKind::Stellaswap => "moonbeam",
            other => other.as_str(),
        }
    }

    pub fn default_interval_secs(&self) -> u64 {
        match self {
            SourceKind::Bifrost => 3_600,
            SourceKind::Hydration => 43_200,
            SourceKind::HydrationPrice => 600,
            SourceKind::Stellaswap => 3_600,
        }
    }

    /// Environment variable overriding the fetch cadence
    pub fn interval_var(&self) -> &'static str {
        match self {
            SourceKind::Bifrost => "BIFROST_INTERVAL_SECS",
            SourceKind::Hydration => "HYDRATION_INTERVAL_SECS",
            SourceKind::HydrationPrice => "HYDRATION_PRICE_INTERVAL_SECS",
            SourceKind::Stellaswap => "STELLASWAP_INTERVAL_SECS",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unknown source '{}' (expected one of: bifrost, hydration, hydration_price, stellaswap)",
            self.0
        )
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for SourceKind {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bifrost" => Ok(SourceKind::Bifrost),
            "hydration" => Ok(SourceKind::Hydration),
            "hydration_price" | "hydration-price" => Ok(SourceKind::HydrationPrice),
            "stellaswap" | "moonbeam" => Ok(SourceKind::Stellaswap),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}
