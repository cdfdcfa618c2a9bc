//! Rate-limit policies per endpoint class and tier.

use std::time::Duration;

use vget_models::Tier;

/// Category of request used to select a rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Login/registration traffic (proxied to the external auth service).
    Auth,
    /// Metadata probes.
    VideoInfo,
    /// Download and subtitle submissions.
    Download,
    /// Everything else.
    GenericApi,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Auth => "auth",
            EndpointClass::VideoInfo => "video-info",
            EndpointClass::Download => "download",
            EndpointClass::GenericApi => "generic-api",
        }
    }
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Limit/window pair for one endpoint class.
#[derive(Debug, Clone, Copy)]
pub struct ClassPolicy {
    /// Requests allowed per window, before the tier multiplier.
    pub limit: u32,
    /// Window duration.
    pub window: Duration,
}

impl ClassPolicy {
    /// Policy table per endpoint class.
    pub fn for_class(class: EndpointClass) -> Self {
        match class {
            EndpointClass::Auth => Self {
                limit: 10,
                window: Duration::from_secs(15 * 60),
            },
            EndpointClass::VideoInfo => Self {
                limit: 30,
                window: Duration::from_secs(60),
            },
            EndpointClass::Download => Self {
                limit: 10,
                window: Duration::from_secs(60),
            },
            EndpointClass::GenericApi => Self {
                limit: 60,
                window: Duration::from_secs(60),
            },
        }
    }

    /// Limit after applying the tier multiplier, never below 1.
    ///
    /// Unauthenticated callers get the strictest window; pro the loosest.
    pub fn effective_limit(&self, tier: Tier) -> u32 {
        let multiplier = match tier {
            Tier::Anonymous => 0.5,
            Tier::Free => 1.0,
            Tier::Pro => 3.0,
        };
        ((self.limit as f64 * multiplier) as u32).max(1)
    }
}
