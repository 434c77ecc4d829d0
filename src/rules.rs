// Rule engine: map a mined pattern plus the user's categories to one product.
//
// Lookup order:
//   1. pattern cache (oracle answers persisted from earlier runs)
//   2. RULES in order: taxonomy category rules, then pattern-shape rules
//   3. external oracle, whose answer is cached; on failure a fixed
//      low-confidence fallback is returned and nothing is cached

use crate::error::NboError;
use crate::taxonomy;
use crate::types::{Product, UserProfile};
use crate::util;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

const RULE_PROMPT: &str = include_str!("../prompts/rule.txt");

const FALLBACK_PRODUCT: Product = Product::CreditCard;
const FALLBACK_REASON: &str = "General spending pattern; no specific rule available";
const DEFAULT_ORACLE_REASON: &str = "Based on pattern analysis";

/// Path patterns handed to the oracle for graph-level rules
const GRAPH_RULE_PATHS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Score contributed per matched pattern
    pub fn weight(&self) -> u32 {
        match self {
            Confidence::High => 3,
            Confidence::Medium => 2,
            Confidence::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" | "высокая" => Ok(Confidence::High),
            "medium" | "средняя" => Ok(Confidence::Medium),
            "low" | "низкая" => Ok(Confidence::Low),
            other => Err(format!("unknown confidence: {}", other)),
        }
    }
}

/// What a rule recommends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub product: Product,
    pub reason: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Cache,
    Category,
    Shape,
    Oracle,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub pattern: String,
    #[serde(flatten)]
    pub rule: Rule,
    pub source: RuleSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePredicate {
    /// Top category or top brand category belongs to this taxonomy slug
    Category(&'static str),
    /// Compact pattern (no separators) contains this code run
    PatternContains(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct RuleRecord {
    pub predicate: RulePredicate,
    pub product: Product,
    pub reason: &'static str,
    pub confidence: Confidence,
}

impl RuleRecord {
    pub fn matches(&self, compact_pattern: &str, profile: &UserProfile) -> bool {
        match self.predicate {
            RulePredicate::Category(slug) => [
                profile.top_category.as_deref(),
                profile.top_brand_category.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|cat| taxonomy::matches(cat, slug)),
            RulePredicate::PatternContains(run) => compact_pattern.contains(run),
        }
    }

    fn source(&self) -> RuleSource {
        match self.predicate {
            RulePredicate::Category(_) => RuleSource::Category,
            RulePredicate::PatternContains(_) => RuleSource::Shape,
        }
    }

    fn to_rule(self) -> Rule {
        Rule {
            product: self.product,
            reason: self.reason.to_string(),
            confidence: self.confidence,
        }
    }
}

const fn category(
    slug: &'static str,
    product: Product,
    confidence: Confidence,
    reason: &'static str,
) -> RuleRecord {
    RuleRecord {
        predicate: RulePredicate::Category(slug),
        product,
        reason,
        confidence,
    }
}

const fn shape(
    run: &'static str,
    product: Product,
    reason: &'static str,
) -> RuleRecord {
    RuleRecord {
        predicate: RulePredicate::PatternContains(run),
        product,
        reason,
        confidence: Confidence::Low,
    }
}

/// Heuristic rules, evaluated in order; the first match wins.
pub static RULES: &[RuleRecord] = &[
    category("real_estate", Product::Mortgage, Confidence::High, "Interest in real estate and renovation points to a home purchase"),
    category("construction", Product::Mortgage, Confidence::Medium, "Building-material purchases suggest a home project"),
    category("furniture", Product::ConsumerLoan, Confidence::Medium, "Furniture is a typical large planned purchase"),
    category("home_appliances", Product::ConsumerLoan, Confidence::Medium, "Appliances are often bought on installment"),
    category("auto", Product::ConsumerLoan, Confidence::Medium, "Car-related spending suggests financing needs"),
    category("education", Product::ConsumerLoan, Confidence::Medium, "Education costs are commonly financed"),
    category("travel", Product::CreditCard, Confidence::High, "Travel spending benefits from card cashback and miles"),
    category("electronics", Product::CreditCard, Confidence::High, "Electronics purchases fit a card with a grace period"),
    category("jewelry", Product::CreditCard, Confidence::Medium, "Occasional high-ticket purchases fit a credit card"),
    category("clothing", Product::CreditCard, Confidence::Medium, "Regular apparel shopping fits a cashback card"),
    category("beauty", Product::CreditCard, Confidence::Low, "Frequent small purchases fit a cashback card"),
    category("entertainment", Product::CreditCard, Confidence::Low, "Leisure spending fits a cashback card"),
    category("finance", Product::Deposit, Confidence::High, "Interest in financial services suggests savings goals"),
    category("children", Product::Deposit, Confidence::Medium, "Family spending suggests saving for the future"),
    category("food", Product::DebitCard, Confidence::Medium, "Everyday grocery spending fits a debit card"),
    category("pharmacy", Product::DebitCard, Confidence::Low, "Routine pharmacy purchases fit a debit card"),
    category("health", Product::DebitCard, Confidence::Low, "Routine health spending fits a debit card"),
    category("sport", Product::DebitCard, Confidence::Low, "Regular sports spending fits a debit card"),
    category("books", Product::DebitCard, Confidence::Low, "Small regular purchases fit a debit card"),
    shape("VVV", Product::Mortgage, "Long browsing streaks suggest research before a large purchase"),
    shape("PPP", Product::CreditCard, "Runs of payments indicate active card usage"),
    shape("VPV", Product::ConsumerLoan, "Alternating browsing and paying suggests a considered purchase"),
    shape("PVP", Product::ConsumerLoan, "Alternating paying and browsing suggests a considered purchase"),
];

/// Context handed to the oracle with a pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleContext {
    pub user_id: String,
    pub avg_tx: f64,
    pub top_category: Option<String>,
    pub top_brand_category: Option<String>,
    /// One-line graph summary
    pub graph_summary: Option<String>,
    pub graph_paths: Vec<String>,
}

impl OracleContext {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            avg_tx: profile.avg_tx,
            top_category: profile.top_category.clone(),
            top_brand_category: profile.top_brand_category.clone(),
            graph_summary: None,
            graph_paths: Vec::new(),
        }
    }

    pub fn with_graph(mut self, summary: String, paths: Vec<String>) -> Self {
        self.graph_summary = Some(summary);
        self.graph_paths = paths;
        self
    }

    /// Compact `key:value` description for prompts
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.avg_tx > 0.0 {
            parts.push(format!("avg_payment:{:.0}", self.avg_tx));
        }
        if let Some(c) = &self.top_category {
            parts.push(format!("top_category:{}", taxonomy::normalized_slug(c)));
        }
        if let Some(c) = &self.top_brand_category {
            parts.push(format!("top_purchase_category:{}", taxonomy::normalized_slug(c)));
        }
        if let Some(g) = &self.graph_summary {
            parts.push(format!("graph:{}", g));
        }
        if !self.graph_paths.is_empty() {
            parts.push(format!("paths:{}", self.graph_paths.join(",")));
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join("|")
        }
    }
}

/// External generator of rules for patterns no heuristic covers.
pub trait RuleOracle: Send + Sync {
    fn generate_rule(&self, pattern: &str, context: &OracleContext) -> Result<Rule, NboError>;
}

pub fn build_rule_prompt(pattern: &str, context: &OracleContext) -> String {
    RULE_PROMPT
        .replace("{pattern}", pattern)
        .replace("{context}", &context.describe())
        .replace("{category_list}", &taxonomy::prompt_category_list())
}

#[derive(Deserialize)]
struct OracleAnswer {
    product: String,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse an oracle's free-text answer into a rule. The product must name a
/// catalog product; confidence defaults to medium.
pub fn parse_rule_response(response: &str) -> Result<Rule, NboError> {
    let answer: OracleAnswer = util::parse_json_object(response)?;
    let product = answer.product.parse::<Product>().map_err(NboError::Parse)?;
    let confidence = answer
        .confidence
        .as_deref()
        .and_then(|c| c.parse().ok())
        .unwrap_or(Confidence::Medium);
    let reason = answer
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ORACLE_REASON.to_string());
    Ok(Rule {
        product,
        reason,
        confidence,
    })
}

/// Concurrent pattern-to-rule cache. Reads never block each other; a racing
/// first write for the same pattern may be lost, which is harmless because
/// later lookups hit whichever answer won.
#[derive(Debug, Default)]
pub struct RuleCache {
    entries: DashMap<String, Rule>,
    dirty: AtomicBool,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON object file. A missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self, NboError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let map: BTreeMap<String, Rule> = serde_json::from_str(&content)?;
        let cache = Self::new();
        for (pattern, rule) in map {
            cache.entries.insert(pattern, rule);
        }
        tracing::debug!(path = %path.display(), rules = cache.len(), "rule cache loaded");
        Ok(cache)
    }

    /// Write all entries as a pretty JSON object sorted by pattern.
    pub fn save(&self, path: &Path) -> Result<(), NboError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let map: BTreeMap<String, Rule> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_string_pretty(&map)?;
        std::fs::write(path, json)?;
        self.dirty.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, pattern: &str) -> Option<Rule> {
        self.entries.get(pattern).map(|r| r.value().clone())
    }

    pub fn insert(&self, pattern: &str, rule: Rule) {
        self.entries.insert(pattern.to_string(), rule);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when entries were added since load/save
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }
}

/// Aggregated rule votes for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVotes {
    pub product: Product,
    pub score: u32,
    pub reasons: Vec<RuleMatch>,
}

pub struct RuleEngine {
    cache: RuleCache,
    oracle: Option<Box<dyn RuleOracle>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleCache::new())
    }
}

impl RuleEngine {
    pub fn new(cache: RuleCache) -> Self {
        Self {
            cache,
            oracle: None,
        }
    }

    pub fn with_oracle(mut self, oracle: Box<dyn RuleOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Find a rule for one pattern (`V→P→V` or `VPV`). Never fails: oracle
    /// errors degrade to the fallback rule, and `None` means no heuristic
    /// matched and no oracle is configured.
    pub fn match_pattern(&self, pattern: &str, profile: &UserProfile) -> Option<RuleMatch> {
        self.match_with_context(pattern, profile, &OracleContext::from_profile(profile))
    }

    pub fn match_with_context(
        &self,
        pattern: &str,
        profile: &UserProfile,
        context: &OracleContext,
    ) -> Option<RuleMatch> {
        let matched = |rule: Rule, source| RuleMatch {
            pattern: pattern.to_string(),
            rule,
            source,
        };

        if let Some(rule) = self.cache.get(pattern) {
            return Some(matched(rule, RuleSource::Cache));
        }

        let compact = compact_pattern(pattern);
        if let Some(record) = RULES.iter().find(|r| r.matches(&compact, profile)) {
            return Some(matched(record.to_rule(), record.source()));
        }

        let oracle = self.oracle.as_ref()?;
        match oracle.generate_rule(pattern, context) {
            Ok(rule) => {
                self.cache.insert(pattern, rule.clone());
                Some(matched(rule, RuleSource::Oracle))
            }
            Err(e) => {
                tracing::warn!(pattern, error = %e, "rule oracle failed, using fallback rule");
                Some(matched(fallback_rule(), RuleSource::Fallback))
            }
        }
    }

    /// Sum confidence weights per product over all patterns, highest first.
    /// Ties keep the order products were first matched in.
    pub fn recommend_from_patterns(
        &self,
        patterns: &[String],
        profile: &UserProfile,
    ) -> Vec<ProductVotes> {
        self.recommend_with_context(patterns, profile, &OracleContext::from_profile(profile))
    }

    pub fn recommend_with_context(
        &self,
        patterns: &[String],
        profile: &UserProfile,
        context: &OracleContext,
    ) -> Vec<ProductVotes> {
        let mut votes: Vec<ProductVotes> = Vec::new();
        for pattern in patterns {
            let Some(m) = self.match_with_context(pattern, profile, context) else {
                continue;
            };
            let product = m.rule.product;
            let weight = m.rule.confidence.weight();
            match votes.iter_mut().find(|v| v.product == product) {
                Some(v) => {
                    v.score += weight;
                    v.reasons.push(m);
                }
                None => votes.push(ProductVotes {
                    product,
                    score: weight,
                    reasons: vec![m],
                }),
            }
        }
        votes.sort_by(|a, b| b.score.cmp(&a.score));
        votes
    }

    /// Oracle rule for the graph as a whole, asked with its leading path
    /// patterns. Empty without an oracle, without paths, or when the oracle
    /// fails. Answers are not cached.
    pub fn rules_from_graph(&self, paths: &[String], context: &OracleContext) -> Vec<Rule> {
        let Some(oracle) = self.oracle.as_ref() else {
            return Vec::new();
        };
        if paths.is_empty() {
            return Vec::new();
        }
        let joined = paths[..paths.len().min(GRAPH_RULE_PATHS)].join(", ");
        match oracle.generate_rule(&joined, context) {
            Ok(rule) => vec![rule],
            Err(e) => {
                tracing::warn!(user_id = %context.user_id, error = %e, "graph rule oracle failed");
                Vec::new()
            }
        }
    }
}

fn fallback_rule() -> Rule {
    Rule {
        product: FALLBACK_PRODUCT,
        reason: FALLBACK_REASON.to_string(),
        confidence: Confidence::Low,
    }
}

/// `V→P→V` / `V P V` / `vpv` -> `VPV`
pub fn compact_pattern(pattern: &str) -> String {
    pattern
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == '?')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
