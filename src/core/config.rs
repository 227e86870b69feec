#[cfg(feature = "serde")]
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};
use crate::fixed::{Weight, UNIT};
use crate::middle::DIM;

/// Execution tier for a clock cycle's fanout sweep.
///
/// - `Single`: the Root fans out its whole range on the calling thread (debug mode)
/// - `Threaded`: one scoped worker thread per sub-range, joined before the buffer swap
/// - `Parallel`: the same sub-ranges dispatched through rayon (requires `parallel` feature)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ExecutionTier {
    Single,
    #[default]
    Threaded,
    /// Falls back to `Threaded` when the `parallel` feature is off.
    Parallel,
}

impl ExecutionTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Some(ExecutionTier::Single),
            "threaded" => Some(ExecutionTier::Threaded),
            "parallel" => Some(ExecutionTier::Parallel),
            _ => None,
        }
    }

    /// The tier that will actually run with the compiled feature set.
    pub fn effective(self) -> Self {
        match self {
            #[cfg(not(feature = "parallel"))]
            ExecutionTier::Parallel => ExecutionTier::Threaded,
            t => t,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetConfig {
    /// Worker count for `Threaded`/`Parallel` sweeps.
    pub threads: usize,
    pub tier: ExecutionTier,

    /// Debug verbosity; above 0 every fanout logs begin/end at trace level.
    pub verbose: u8,

    // If set, connectivity and noise frames are reproducible.
    pub seed: Option<u64>,

    /// Live edges per bundle (1..=8); remaining slots stay zero.
    pub live_edges: usize,
    pub edge_weight_min: Weight,
    pub edge_weight_max: Weight,

    /// Settle passes allowed before the build is declared divergent.
    pub max_build_passes: u32,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            tier: ExecutionTier::Threaded,
            verbose: 0,
            seed: None,
            live_edges: DIM,
            edge_weight_min: -(UNIT / 8),
            edge_weight_max: UNIT / 4,
            max_build_passes: 16,
        }
    }
}

impl NetConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_tier(mut self, tier: ExecutionTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_live_edges(mut self, live_edges: usize) -> Self {
        self.live_edges = live_edges;
        self
    }

    pub fn with_edge_weights(mut self, min: Weight, max: Weight) -> Self {
        self.edge_weight_min = min;
        self.edge_weight_max = max;
        self
    }

    pub fn seed_or_default(&self) -> u64 {
        self.seed.unwrap_or(1)
    }

    pub fn validate(&self) -> NetResult<()> {
        if self.threads == 0 {
            return Err(NetError::Config("threads must be at least 1".into()));
        }
        if self.live_edges == 0 || self.live_edges > DIM {
            return Err(NetError::Config(format!(
                "live_edges must be within 1..={DIM}, got {}",
                self.live_edges
            )));
        }
        if self.edge_weight_min > self.edge_weight_max {
            return Err(NetError::Config(format!(
                "edge weight range is inverted: {}..={}",
                self.edge_weight_min, self.edge_weight_max
            )));
        }
        if self.max_build_passes == 0 {
            return Err(NetError::Config("max_build_passes must be at least 1".into()));
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_json_str(s: &str) -> NetResult<Self> {
        let cfg: NetConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[cfg(feature = "serde")]
    pub fn from_path(path: impl AsRef<Path>) -> NetResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> NetResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Shared debugging context, read by every network through `&self`.
#[derive(Debug, Default)]
pub struct NetContext {
    verbose: AtomicU8,
}

impl NetContext {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose: AtomicU8::new(verbose),
        }
    }

    #[inline]
    pub fn verbose(&self) -> u8 {
        self.verbose.load(Ordering::Relaxed)
    }

    pub fn set_verbose(&self, verbose: u8) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_config_default() {
        let cfg = NetConfig::default();
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.live_edges, DIM);
        assert!(cfg.seed.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn net_config_builder() {
        let cfg = NetConfig::default()
            .with_threads(3)
            .with_tier(ExecutionTier::Single)
            .with_seed(42)
            .with_live_edges(4)
            .with_edge_weights(1, 2);
        assert_eq!(cfg.threads, 3);
        assert_eq!(cfg.tier, ExecutionTier::Single);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.live_edges, 4);
        assert_eq!((cfg.edge_weight_min, cfg.edge_weight_max), (1, 2));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(NetConfig::default().with_threads(0).validate().is_err());
        assert!(NetConfig::default().with_live_edges(9).validate().is_err());
        assert!(NetConfig::default().with_edge_weights(5, 4).validate().is_err());
    }

    #[test]
    fn tier_parse() {
        assert_eq!(ExecutionTier::parse("Single"), Some(ExecutionTier::Single));
        assert_eq!(ExecutionTier::parse("threaded"), Some(ExecutionTier::Threaded));
        assert_eq!(ExecutionTier::parse("gpu"), None);
        #[cfg(not(feature = "parallel"))]
        assert_eq!(ExecutionTier::Parallel.effective(), ExecutionTier::Threaded);
    }

    #[test]
    fn context_verbosity_is_shared() {
        let cx = NetContext::new(0);
        std::thread::scope(|s| {
            s.spawn(|| cx.set_verbose(3));
        });
        assert_eq!(cx.verbose(), 3);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let cfg = NetConfig::from_json_str(r#"{ "threads": 2, "tier": "single" }"#).unwrap();
        assert_eq!(cfg.threads, 2);
        assert_eq!(cfg.tier, ExecutionTier::Single);
        assert_eq!(cfg.max_build_passes, 16);

        let back = NetConfig::from_json_str(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);

        assert!(NetConfig::from_json_str(r#"{ "threads": 0 }"#).is_err());
    }
}
