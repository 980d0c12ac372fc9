//! Runtime-configurable parameters for overlay groups.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `OVERLAY_`) or by constructing a custom `OverlayConfig`.

use std::time::Duration;

/// Allgather algorithm preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllgatherAlgorithm {
    /// Recursive doubling when the group is a power of two, Bruck otherwise.
    #[default]
    Auto,
    /// Rendezvous through the lifeline, released by tree-relay broadcast.
    Direct,
    /// Recursive doubling, falling back to Bruck when declined.
    RecursiveDoubling,
    /// Bruck's algorithm only.
    Brucks,
}

/// Routing topology built over the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopologyKind {
    /// Binomial spanning tree rooted at the lifeline.
    #[default]
    Binomial,
    /// The lifeline fans out to every member directly.
    Flat,
}

/// Tuning parameters for the collective engine and its event loop.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// In-flight collectives older than this are failed with a timeout.
    pub collective_timeout: Duration,

    /// How often the event loop sweeps for expired collectives.
    pub sweep_interval: Duration,

    /// Allgather algorithm preference.
    pub allgather: AllgatherAlgorithm,

    /// Topology used for relay and routed sends.
    pub topology: TopologyKind,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            collective_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(500),
            allgather: AllgatherAlgorithm::Auto,
            topology: TopologyKind::Binomial,
        }
    }
}

impl OverlayConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `OVERLAY_COLLECTIVE_TIMEOUT_SECS`
    /// - `OVERLAY_SWEEP_INTERVAL_MS`
    /// - `OVERLAY_ALLGATHER` (`auto`, `direct`, `rcd`, `brucks`)
    /// - `OVERLAY_TOPOLOGY` (`binomial`, `flat`)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("OVERLAY_COLLECTIVE_TIMEOUT_SECS")
            && let Ok(s) = v.parse::<u64>()
        {
            cfg.collective_timeout = Duration::from_secs(s);
        }
        if let Ok(v) = std::env::var("OVERLAY_SWEEP_INTERVAL_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            cfg.sweep_interval = Duration::from_millis(ms.max(1));
        }
        if let Ok(v) = std::env::var("OVERLAY_ALLGATHER") {
            match parse_allgather(&v) {
                Some(algo) => cfg.allgather = algo,
                None => tracing::warn!(value = %v, "ignoring unknown OVERLAY_ALLGATHER"),
            }
        }
        if let Ok(v) = std::env::var("OVERLAY_TOPOLOGY") {
            match parse_topology(&v) {
                Some(kind) => cfg.topology = kind,
                None => tracing::warn!(value = %v, "ignoring unknown OVERLAY_TOPOLOGY"),
            }
        }

        cfg
    }
}

/// Parse an allgather algorithm name: "auto", "direct", "rcd", "brucks".
pub fn parse_allgather(s: &str) -> Option<AllgatherAlgorithm> {
    match s.trim().to_lowercase().as_str() {
        "auto" => Some(AllgatherAlgorithm::Auto),
        "direct" => Some(AllgatherAlgorithm::Direct),
        "rcd" | "recursive_doubling" => Some(AllgatherAlgorithm::RecursiveDoubling),
        "brucks" | "bruck" => Some(AllgatherAlgorithm::Brucks),
        _ => None,
    }
}

/// Parse a topology name: "binomial" or "flat".
pub fn parse_topology(s: &str) -> Option<TopologyKind> {
    match s.trim().to_lowercase().as_str() {
        "binomial" => Some(TopologyKind::Binomial),
        "flat" => Some(TopologyKind::Flat),
        _ => None,
    }
}
