//! Lowering configuration.
//!
//! The configuration is fixed per compilation and read by both passes.
//! Defaults describe a release build of the reference runtime; presets
//! cover the sanitizer build and the store-at-barrier collector.
//!
//! # Example
//!
//! ```
//! use strata_jit::config::{BarrierOrdering, LoweringConfig};
//!
//! let config = LoweringConfig {
//!     read_barrier: true,
//!     ..LoweringConfig::satb()
//! };
//! assert_eq!(config.barrier_ordering, BarrierOrdering::StoreAtBarrier);
//! ```

use tracing::warn;

use crate::runtime::RuntimeLayout;

/// Order of the raw store and the write-barrier call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarrierOrdering {
    /// Store first; the barrier sees the new value in the slot.
    #[default]
    PostWrite,
    /// Barrier first; the collector snapshots the old slot value.
    StoreAtBarrier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweringConfig {
    /// Route every allocation through the runtime so the sanitizer can
    /// track it. Disables inline fast paths.
    pub sanitizer: bool,

    pub barrier_ordering: BarrierOrdering,

    /// Store tagged pointers as 32-bit compressed values.
    ///
    /// Only affects the post-write ordering.
    pub compressed_pointers: bool,

    /// Emit read barriers for barrier-classified loads. Off unless the
    /// collector marks concurrently.
    ///
    /// When off, such loads lower like plain loads.
    pub read_barrier: bool,

    pub layout: RuntimeLayout,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            sanitizer: false,
            barrier_ordering: BarrierOrdering::PostWrite,
            compressed_pointers: false,
            read_barrier: false,
            layout: RuntimeLayout::default(),
        }
    }
}

impl LoweringConfig {
    /// Sanitizer build: all allocations go through the runtime.
    pub fn sanitizer() -> Self {
        Self {
            sanitizer: true,
            ..Self::default()
        }
    }

    /// Collector with snapshot-at-the-beginning marking.
    pub fn satb() -> Self {
        Self {
            barrier_ordering: BarrierOrdering::StoreAtBarrier,
            ..Self::default()
        }
    }

    /// Every optional lowering enabled, for exercising all paths in tests.
    pub fn for_testing() -> Self {
        Self {
            read_barrier: true,
            compressed_pointers: true,
            ..Self::default()
        }
    }

    /// Defaults overridden by `STRATA_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("STRATA_SANITIZER") {
            config.sanitizer = parse_flag("STRATA_SANITIZER", &v, config.sanitizer);
        }
        if let Some(v) = lookup("STRATA_READ_BARRIER") {
            config.read_barrier = parse_flag("STRATA_READ_BARRIER", &v, config.read_barrier);
        }
        if let Some(v) = lookup("STRATA_COMPRESSED_POINTERS") {
            config.compressed_pointers =
                parse_flag("STRATA_COMPRESSED_POINTERS", &v, config.compressed_pointers);
        }
        if let Some(v) = lookup("STRATA_BARRIER_ORDER") {
            config.barrier_ordering = match v.trim().to_ascii_lowercase().as_str() {
                "post" | "post-write" | "postwrite" => BarrierOrdering::PostWrite,
                "satb" | "store-at-barrier" => BarrierOrdering::StoreAtBarrier,
                other => {
                    warn!(value = other, "unknown STRATA_BARRIER_ORDER, keeping default");
                    config.barrier_ordering
                }
            };
        }

        config
    }
}

fn parse_flag(key: &str, value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        other => {
            warn!(key, value = other, "unrecognized boolean, keeping default");
            default
        }
    }
}
