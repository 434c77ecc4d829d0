// Engine configuration: every tuning constant of the graph builder, analytics,
// miner and fusion lives here with its default, overridable from a TOML file.

use crate::error::NboError;
use crate::types::ActionType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub graph: GraphConfig,
    pub analytics: AnalyticsConfig,
    pub patterns: PatternConfig,
    pub fusion: FusionConfig,
    pub scoring: ScoringConfig,
    pub rules: RulesConfig,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Max gap between two events for a temporal edge
    pub time_window_hours: u32,
    /// How many preceding events are checked for temporal edges
    pub predecessor_window: usize,
    pub marketplace_cap: usize,
    pub retail_cap: usize,
    pub payments_cap: usize,
    pub receipts_cap: usize,
    pub action_weights: ActionWeights,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            time_window_hours: 24,
            predecessor_window: 20,
            marketplace_cap: 30,
            retail_cap: 20,
            payments_cap: 20,
            receipts_cap: 15,
            action_weights: ActionWeights::default(),
        }
    }
}

/// Relative importance of each action kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionWeights {
    pub view: f64,
    pub click: f64,
    pub add_to_cart: f64,
    pub transaction: f64,
    pub order: f64,
    pub purchase: f64,
}

impl Default for ActionWeights {
    fn default() -> Self {
        Self {
            view: 1.0,
            click: 2.0,
            add_to_cart: 3.0,
            transaction: 4.0,
            order: 5.0,
            purchase: 5.0,
        }
    }
}

impl ActionWeights {
    /// Weight for an action; `None` for actions that never become graph nodes.
    pub fn get(&self, action: ActionType) -> Option<f64> {
        match action {
            ActionType::View => Some(self.view),
            ActionType::Click => Some(self.click),
            ActionType::AddToCart => Some(self.add_to_cart),
            ActionType::Transaction => Some(self.transaction),
            ActionType::Order => Some(self.order),
            ActionType::Purchase => Some(self.purchase),
            ActionType::Impression | ActionType::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Nodes at or below this importance are ignored by the scorer
    pub importance_threshold: f64,
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Reachable targets examined for path statistics
    pub path_targets: usize,
    /// Longest simple path searched, in edges
    pub path_cutoff: usize,
    pub paths_per_target: usize,
    /// DFS expansions allowed per target before giving up on it
    pub path_expansion_budget: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            importance_threshold: 0.01,
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
            path_targets: 20,
            path_cutoff: 6,
            paths_per_target: 3,
            path_expansion_budget: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub min_len: usize,
    pub min_support: usize,
    pub max_len: usize,
    /// Patterns considered by the pattern signal
    pub top_patterns: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_len: 3,
            min_support: 2,
            max_len: 5,
            top_patterns: 10,
        }
    }
}

/// Weights for (base, graph, pattern) signals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub base: f64,
    pub graph: f64,
    pub pattern: f64,
}

impl FusionWeights {
    pub const fn new(base: f64, graph: f64, pattern: f64) -> Self {
        Self {
            base,
            graph,
            pattern,
        }
    }

    pub fn sum(&self) -> f64 {
        self.base + self.graph + self.pattern
    }

    fn validate(&self, name: &str) -> Result<(), NboError> {
        if self.base < 0.0 || self.graph < 0.0 || self.pattern < 0.0 {
            return Err(NboError::Config(format!(
                "fusion.{}: weights must be non-negative",
                name
            )));
        }
        if (self.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(NboError::Config(format!(
                "fusion.{}: weights sum to {}, expected 1.0",
                name,
                self.sum()
            )));
        }
        Ok(())
    }
}

/// Adaptive fusion weights keyed by which signal sets are available
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub all_signals: FusionWeights,
    pub graph_only: FusionWeights,
    pub patterns_only: FusionWeights,
    pub base_only: FusionWeights,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            all_signals: FusionWeights::new(0.40, 0.35, 0.25),
            graph_only: FusionWeights::new(0.50, 0.50, 0.0),
            patterns_only: FusionWeights::new(0.60, 0.0, 0.40),
            base_only: FusionWeights::new(1.0, 0.0, 0.0),
        }
    }
}

impl FusionConfig {
    pub fn select(&self, has_graph: bool, has_patterns: bool) -> FusionWeights {
        match (has_graph, has_patterns) {
            (true, true) => self.all_signals,
            (true, false) => self.graph_only,
            (false, true) => self.patterns_only,
            (false, false) => self.base_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub top_k: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Where oracle-generated rules are persisted; platform cache dir when unset
    pub cache_path: Option<PathBuf>,
}

impl RulesConfig {
    pub fn resolved_cache_path(&self) -> PathBuf {
        match &self.cache_path {
            Some(p) => p.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("nbo-engine")
                .join("pattern_rules.json"),
        }
    }
}

/// External command answering rule and explanation prompts. The prompt is
/// written to its stdin and the answer read from stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Program and arguments; empty disables the oracle
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 60,
        }
    }
}

impl OracleConfig {
    pub fn is_enabled(&self) -> bool {
        !self.command.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, NboError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NboError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, NboError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), NboError> {
        self.fusion.all_signals.validate("all_signals")?;
        self.fusion.graph_only.validate("graph_only")?;
        self.fusion.patterns_only.validate("patterns_only")?;
        self.fusion.base_only.validate("base_only")?;

        if self.patterns.min_len == 0 {
            return Err(NboError::Config("patterns.min_len must be >= 1".to_string()));
        }
        if self.patterns.max_len < self.patterns.min_len {
            return Err(NboError::Config(format!(
                "patterns.max_len ({}) is below min_len ({})",
                self.patterns.max_len, self.patterns.min_len
            )));
        }
        if !(0.0..1.0).contains(&self.analytics.damping) {
            return Err(NboError::Config(format!(
                "analytics.damping must be in [0, 1), got {}",
                self.analytics.damping
            )));
        }
        if self.oracle.is_enabled() && self.oracle.timeout_secs == 0 {
            return Err(NboError::Config(
                "oracle.timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.analytics.max_iterations == 0 {
            return Err(NboError::Config(
                "analytics.max_iterations must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
