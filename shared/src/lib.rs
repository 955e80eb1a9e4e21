use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Widget state as it travels over the wire: key name to JSON value.
pub type StateMap = Map<String, Value>;

// ===== STATE KEYS =====

pub const BUILD_KEY: &str = "build";
pub const POSITION_KEY: &str = "position";
pub const ASSOCIATIONS_VIEW_KEY: &str = "_associations_view";

// ===== MESSAGE TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "method", content = "state", rename_all = "snake_case")]
pub enum UpMsg {
    /// Local-origin keys flushed by the view.
    StateUpdate(StateMap),
    RequestState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DownMsg {
    StateUpdate { state: StateMap },
    ValidationError { key: String, message: String },
}

// ===== CORE DATA TYPES =====

/// Genomic interval currently displayed or requested.
///
/// Consumers assume `start <= end` and a non-empty `chr`; nothing here
/// enforces it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub chr: String,
    pub start: i64,
    pub end: i64,
}

impl Viewport {
    pub fn new(chr: impl Into<String>, start: i64, end: i64) -> Self {
        Viewport {
            chr: chr.into(),
            start,
            end,
        }
    }

    /// Window of `flank` bases centred on `position`.
    /// Window of width `flank` around `position`. Bounds saturate at the
    /// `i64` limits.
    pub fn centered(chr: impl Into<String>, position: i64, flank: i64) -> Self {
        let half = flank / 2;
        Viewport::new(
            chr,
            position.saturating_sub(half),
            position.saturating_add(half),
        )
    }

    pub fn contains(&self, chr: &str, position: i64) -> bool {
        self.chr == chr && position >= self.start && position <= self.end
    }

    /// Same viewport with both bounds raised to at least `min`.
    pub fn clamped_to(&self, min: i64) -> Self {
        Viewport::new(self.chr.clone(), self.start.max(min), self.end.max(min))
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "chr": self.chr,
            "start": self.start,
            "end": self.end,
        })
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport::new("1", 0, 5_000_000)
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chr, self.start, self.end)
    }
}

/// Slice of association rows served for one viewport, in columnar form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AssociationsView {
    #[serde(default)]
    pub data: BTreeMap<String, Vec<Value>>,
    pub range: Viewport,
}

impl AssociationsView {
    pub fn empty(range: Viewport) -> Self {
        AssociationsView {
            data: BTreeMap::new(),
            range,
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.values().map(Vec::len).max().unwrap_or(0)
    }
}

// ===== CONFIG TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub widget: WidgetSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub kernel: KernelSection,
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WidgetSection {
    pub build: String,
    pub position: Viewport,
}

impl Default for WidgetSection {
    fn default() -> Self {
        Self {
            build: "GRCh38".to_string(),
            position: Viewport::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    /// Retries after the first check; `-1` retries forever.
    pub max_attempts: i64,
    pub interval_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            interval_ms: 75,
            backoff: BackoffConfig::Constant,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    #[default]
    Constant,
    Linear {
        step_ms: u64,
    },
    Exponential {
        factor: f64,
        max_interval_ms: u64,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KernelSection {
    pub flank: i64,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self { flank: 500_000 }
    }
}
