//! Per-config API call budget over a rolling one-minute window

use chrono::{DateTime, Duration, Utc};

use simload_common::crd::LoadProfile;

/// Calls per minute per node when no rate is configured
pub const DEFAULT_RATE_PER_NODE: u64 = 20;

/// Which field the effective rate came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateSource {
    /// `apiCallRateStatic`
    Static,
    /// `apiCallRatePerNode`
    PerNode,
    /// deprecated `apiCallRate`, treated as per-node
    Deprecated,
    /// [`DEFAULT_RATE_PER_NODE`]
    Default,
}

/// Resolve the calls-per-minute budget for `nodes` KWOK nodes
///
/// Precedence: static total, per-node, deprecated per-node, default per-node.
/// Negative values clamp to zero.
pub fn effective_rate(profile: &LoadProfile, nodes: u32) -> (u64, RateSource) {
    let nodes = u64::from(nodes);
    let clamp = |v: i32| u64::try_from(v).unwrap_or(0);

    if let Some(total) = profile.api_call_rate_static {
        (clamp(total), RateSource::Static)
    } else if let Some(per_node) = profile.api_call_rate_per_node {
        (clamp(per_node).saturating_mul(nodes), RateSource::PerNode)
    } else if let Some(per_node) = profile.api_call_rate {
        (clamp(per_node).saturating_mul(nodes), RateSource::Deprecated)
    } else {
        (DEFAULT_RATE_PER_NODE.saturating_mul(nodes), RateSource::Default)
    }
}

/// Calls admitted in the current window
#[derive(Clone, Debug, Default)]
pub struct RateBudget {
    used: u64,
    window_start: Option<DateTime<Utc>>,
}

impl RateBudget {
    /// Length of one budget window
    pub fn window() -> Duration {
        Duration::minutes(1)
    }

    /// Admit `estimated` calls against `rate` if they fit in the window.
    ///
    /// A denied request leaves the counter untouched.
    pub fn admit(&mut self, now: DateTime<Utc>, estimated: u64, rate: u64) -> bool {
        let expired = self
            .window_start
            .map_or(true, |start| now - start >= Self::window());
        if expired {
            self.used = 0;
            self.window_start = Some(now);
        }

        match self.used.checked_add(estimated) {
            Some(total) if total <= rate => {
                self.used = total;
                true
            }
            _ => false,
        }
    }

    /// Calls admitted so far in this window
    pub fn used(&self) -> u64 {
        self.used
    }
}
