//! Entitlement tiers and the quality/feature policy table.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::format::{FormatInfo, ResolutionRank};

/// Account entitlement class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No account, session/IP identified.
    #[default]
    Anonymous,
    /// Registered, unpaid.
    Free,
    /// Paid subscription.
    Pro,
}

impl Tier {
    /// Parse from string (case-insensitive). Unknown values fall back to anonymous.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "free" => Tier::Free,
            "pro" => Tier::Pro,
            _ => Tier::Anonymous,
        }
    }

    /// Get the tier name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }

    /// Policy limits for this tier.
    pub fn limits(&self) -> TierLimits {
        TierLimits::for_tier(*self)
    }

    /// Whether this tier may request the given format.
    ///
    /// Audio-only and rank-less formats are never gated; video formats are
    /// compared ordinally against the tier ceiling. `pro` has no ceiling.
    pub fn allows_format(&self, format: &FormatInfo) -> bool {
        let Some(rank) = format.resolution else {
            return true;
        };
        match self.limits().max_resolution {
            Some(ceiling) => rank <= ceiling,
            None => true,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tier policy: quality ceiling and feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TierLimits {
    /// Highest requestable resolution; `None` means unbounded.
    pub max_resolution: Option<ResolutionRank>,
    /// Whether the UI should show ads for this tier.
    pub show_ads: bool,
    /// Maximum in-flight jobs per requester.
    pub max_concurrent_jobs: usize,
}

impl TierLimits {
    /// Policy table. Pure and total.
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Anonymous => Self {
                max_resolution: Some(ResolutionRank::P720),
                show_ads: true,
                max_concurrent_jobs: 1,
            },
            Tier::Free => Self {
                max_resolution: Some(ResolutionRank::P1080),
                show_ads: true,
                max_concurrent_jobs: 2,
            },
            Tier::Pro => Self {
                max_resolution: None,
                show_ads: false,
                max_concurrent_jobs: 5,
            },
        }
    }
}
