// Recommendation entry point and per-user pipeline.
//
// predict: trained regressor when one is usable, otherwise the hybrid scorer.
// process_user: graph -> analytics -> patterns -> profile -> predict
//   -> rule votes -> explanations -> merged top-k.
// Graph-level oracle output (analysis text, graph rules) is reported
// alongside and does not enter the ranking.
// Rule votes are scaled by 3 x patterns evaluated so both sources share [0, 1].

use crate::analytics::{self, GraphFeatures, GraphStats};
use crate::config::EngineConfig;
use crate::error::NboError;
use crate::explain::Explainer;
use crate::graph;
use crate::patterns::{self, FrequentPattern, PatternStatistics};
use crate::profile;
use crate::rules::{Confidence, OracleContext, ProductVotes, Rule, RuleEngine};
use crate::scorer;
use crate::types::{EventTables, Product, RecommendationScore, UserProfile};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Nodes listed per section in the graph summary handed to oracles
const GRAPH_SUMMARY_NODES: usize = 5;

/// Trained model mapping a profile feature vector to one score per product,
/// in catalog order.
pub trait Regressor: Send + Sync {
    fn is_trained(&self) -> bool;
    fn predict(&self, features: &[f64]) -> Result<Vec<f64>, NboError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    /// Trained regressor
    Model,
    /// Hybrid scorer
    Fallback,
    /// Pattern rule votes
    Rules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub product: String,
    pub score: f64,
    pub source: ScoreSource,
    pub reason: String,
}

/// Everything computed for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReport {
    pub user_id: String,
    pub profile: UserProfile,
    pub graph_stats: GraphStats,
    pub graph_summary: String,
    /// Oracle reading of the graph summary
    pub graph_analysis: Option<String>,
    /// Oracle rules from the graph's path patterns
    pub graph_rules: Vec<Rule>,
    pub patterns: Vec<String>,
    pub pattern_stats: PatternStatistics,
    pub recommendations: Vec<Recommendation>,
}

pub struct Recommender {
    config: EngineConfig,
    regressor: Option<Box<dyn Regressor>>,
    rules: RuleEngine,
    explainer: Explainer,
}

impl Recommender {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            regressor: None,
            rules: RuleEngine::default(),
            explainer: Explainer::new(),
        }
    }

    pub fn with_regressor(mut self, regressor: Box<dyn Regressor>) -> Self {
        self.regressor = Some(regressor);
        self
    }

    pub fn with_rules(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_explainer(mut self, explainer: Explainer) -> Self {
        self.explainer = explainer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Ranked top-k products. Uses the regressor when present and trained;
    /// any regressor problem falls through to the hybrid scorer.
    pub fn predict(
        &self,
        profile: &UserProfile,
        top_k: usize,
        graph: Option<&GraphFeatures>,
        patterns: &[FrequentPattern],
    ) -> Vec<RecommendationScore> {
        self.predict_with_source(profile, top_k, graph, patterns).0
    }

    fn predict_with_source(
        &self,
        profile: &UserProfile,
        top_k: usize,
        graph: Option<&GraphFeatures>,
        patterns: &[FrequentPattern],
    ) -> (Vec<RecommendationScore>, ScoreSource) {
        if let Some(regressor) = self.regressor.as_deref() {
            match model_scores(regressor, profile) {
                Ok(mut ranked) => {
                    ranked.truncate(top_k);
                    return (ranked, ScoreSource::Model);
                }
                Err(e) => tracing::warn!(
                    user_id = %profile.user_id,
                    error = %e,
                    "regressor unavailable, using hybrid scorer"
                ),
            }
        }
        let ranked = scorer::score_products(profile, graph, patterns, &self.config, top_k);
        (ranked, ScoreSource::Fallback)
    }

    /// Full pipeline for one user. Never fails; missing data and collaborator
    /// failures only lower the quality of the result.
    pub fn process_user(&self, user_id: &str, tables: &EventTables) -> UserReport {
        let top_k = self.config.scoring.top_k;

        let graph = graph::build_graph(tables, user_id, &self.config.graph);
        let features = analytics::analyze(&graph, &self.config.analytics);
        let mined = patterns::extract_patterns(tables, &self.config.patterns);
        let profile = profile::build_profile(tables, &mined, user_id);

        let (ranked, source) = self.predict_with_source(&profile, top_k, Some(&features), &mined);
        let mut merged: Vec<Recommendation> = ranked
            .into_iter()
            .map(|r| {
                let reason = match r.product.parse::<Product>() {
                    Ok(product) => self.explainer.explain(&profile, product),
                    Err(_) => String::new(),
                };
                Recommendation {
                    product: r.product,
                    score: r.score,
                    source,
                    reason,
                }
            })
            .collect();

        let graph_summary = analytics::describe_graph(&graph, GRAPH_SUMMARY_NODES);
        let graph_paths = analytics::path_patterns(&graph, self.config.analytics.path_cutoff);
        let context = OracleContext::from_profile(&profile)
            .with_graph(graph_summary.clone(), graph_paths.clone());

        let graph_analysis = if graph.is_trivial() {
            None
        } else {
            self.explainer.analyze_graph(user_id, &graph_summary)
        };
        let graph_rules = if mined.is_empty() {
            Vec::new()
        } else {
            self.rules.rules_from_graph(&graph_paths, &context)
        };

        let evaluated: Vec<String> = profile
            .patterns
            .iter()
            .take(self.config.patterns.top_patterns)
            .cloned()
            .collect();
        if !evaluated.is_empty() {
            let votes = self.rules.recommend_with_context(&evaluated, &profile, &context);
            for rec in rule_recommendations(&votes, evaluated.len(), top_k) {
                merge_recommendation(&mut merged, rec);
            }
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(top_k);

        tracing::debug!(
            user_id,
            nodes = features.stats.nodes,
            patterns = mined.len(),
            recommendations = merged.len(),
            "user processed"
        );

        UserReport {
            user_id: user_id.to_string(),
            pattern_stats: patterns::pattern_statistics(&mined),
            patterns: profile.patterns.clone(),
            profile,
            graph_stats: features.stats,
            graph_summary,
            graph_analysis,
            graph_rules,
            recommendations: merged,
        }
    }

    /// Process users in parallel using rayon, ordered by user id.
    pub fn process_users(&self, users: &BTreeMap<String, EventTables>) -> Vec<UserReport> {
        let entries: Vec<_> = users.iter().collect();
        entries
            .par_iter()
            .map(|(user_id, tables)| self.process_user(user_id, tables))
            .collect()
    }
}

fn model_scores(
    regressor: &dyn Regressor,
    profile: &UserProfile,
) -> Result<Vec<RecommendationScore>, NboError> {
    if !regressor.is_trained() {
        return Err(NboError::Model("regressor is not trained".to_string()));
    }
    let scores = regressor.predict(&profile.feature_vector())?;
    if scores.len() != Product::COUNT {
        return Err(NboError::Model(format!(
            "expected {} scores, got {}",
            Product::COUNT,
            scores.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(NboError::Model("non-finite score".to_string()));
    }

    let mut ranked: Vec<RecommendationScore> = Product::ALL
        .iter()
        .zip(scores)
        .map(|(product, score)| RecommendationScore {
            product: product.name().to_string(),
            score: score.clamp(0.0, 1.0),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(ranked)
}

/// Top-k rule votes on the [0, 1] scale, reason taken from the first match
fn rule_recommendations(
    votes: &[ProductVotes],
    evaluated: usize,
    top_k: usize,
) -> Vec<Recommendation> {
    let max_score = (Confidence::High.weight() as usize * evaluated.max(1)) as f64;
    votes
        .iter()
        .take(top_k)
        .map(|v| Recommendation {
            product: v.product.name().to_string(),
            score: (v.score as f64 / max_score).min(1.0),
            source: ScoreSource::Rules,
            reason: v
                .reasons
                .first()
                .map(|m| m.rule.reason.clone())
                .unwrap_or_default(),
        })
        .collect()
}

/// One entry per product; the higher score wins.
fn merge_recommendation(merged: &mut Vec<Recommendation>, rec: Recommendation) {
    match merged.iter_mut().find(|m| m.product == rec.product) {
        Some(existing) if rec.score > existing.score => *existing = rec,
        Some(_) => {}
        None => merged.push(rec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::ExplanationOracle;
    use crate::rules::{RuleMatch, RuleOracle, RuleSource};
    use crate::types::{ActionType, Domain, Event};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixed(Vec<f64>);

    impl Regressor for Fixed {
        fn is_trained(&self) -> bool {
            true
        }
        fn predict(&self, _features: &[f64]) -> Result<Vec<f64>, NboError> {
            Ok(self.0.clone())
        }
    }

    struct Untrained;

    impl Regressor for Untrained {
        fn is_trained(&self) -> bool {
            false
        }
        fn predict(&self, _features: &[f64]) -> Result<Vec<f64>, NboError> {
            Ok(vec![1.0; Product::COUNT])
        }
    }

    struct Failing;

    impl Regressor for Failing {
        fn is_trained(&self) -> bool {
            true
        }
        fn predict(&self, _features: &[f64]) -> Result<Vec<f64>, NboError> {
            Err(NboError::Model("boom".to_string()))
        }
    }

    struct Scripted {
        fail: bool,
    }

    impl RuleOracle for Scripted {
        fn generate_rule(&self, pattern: &str, _ctx: &OracleContext) -> Result<Rule, NboError> {
            if self.fail {
                return Err(NboError::Oracle("offline".to_string()));
            }
            Ok(Rule {
                product: Product::Deposit,
                reason: format!("paths: {}", pattern),
                confidence: Confidence::Medium,
            })
        }
    }

    impl ExplanationOracle for Scripted {
        fn explain(&self, _prompt: &str) -> Result<String, NboError> {
            if self.fail {
                return Err(NboError::Oracle("offline".to_string()));
            }
            Ok("steady property interest".to_string())
        }
    }

    fn viewer_tables() -> EventTables {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        EventTables::from_events((0..6).map(|i| {
            Event::new("u1", Domain::Marketplace)
                .action(ActionType::View)
                .item(&format!("i{}", i))
                .category("Недвижимость")
                .at(t0 + Duration::minutes(i))
        }))
    }

    /// Views then payments: START → category → brand paths exist
    fn browse_then_pay() -> EventTables {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let mut tables = viewer_tables();
        for i in 0..2 {
            tables.push(
                Event::new("u1", Domain::Payments)
                    .brand("b1")
                    .amount(-500.0)
                    .at(t0 + Duration::minutes(10 + i)),
            );
        }
        tables
    }

    fn with_oracles(fail: bool) -> Recommender {
        Recommender::new(EngineConfig::default())
            .with_rules(RuleEngine::default().with_oracle(Box::new(Scripted { fail })))
            .with_explainer(Explainer::new().with_oracle(Box::new(Scripted { fail })))
    }

    fn fallback(profile: &UserProfile) -> Vec<RecommendationScore> {
        scorer::score_products(profile, None, &[], &EngineConfig::default(), 3)
    }

    #[test]
    fn model_scores_are_ranked_and_clamped() {
        let r = Recommender::new(EngineConfig::default())
            .with_regressor(Box::new(Fixed(vec![0.2, 1.7, 0.5, -0.3, 0.4])));
        let out = r.predict(&UserProfile::default(), 3, None, &[]);
        let names: Vec<&str> = out.iter().map(|s| s.product.as_str()).collect();
        assert_eq!(names, vec!["Credit Card", "Deposit", "Debit Card"]);
        assert_eq!(out[0].score, 1.0);
    }

    #[test]
    fn unusable_regressor_falls_back() {
        let profile = UserProfile::default();
        let expected = fallback(&profile);
        let regressors: Vec<Box<dyn Regressor>> = vec![
            Box::new(Untrained),
            Box::new(Failing),
            Box::new(Fixed(vec![0.5; 2])),
            Box::new(Fixed(vec![f64::NAN, 0.1, 0.1, 0.1, 0.1])),
        ];
        for regressor in regressors {
            let r = Recommender::new(EngineConfig::default()).with_regressor(regressor);
            assert_eq!(r.predict(&profile, 3, None, &[]), expected);
        }
    }

    #[test]
    fn no_regressor_uses_hybrid_scorer() {
        let profile = UserProfile {
            num_payments: 40,
            total_tx: 500_000.0,
            ..UserProfile::default()
        };
        let r = Recommender::new(EngineConfig::default());
        assert_eq!(r.predict(&profile, 3, None, &[]), fallback(&profile));
    }

    #[test]
    fn rule_scores_are_normalized() {
        let votes = vec![ProductVotes {
            product: Product::Mortgage,
            score: 4,
            reasons: vec![RuleMatch {
                pattern: "VVV".to_string(),
                rule: Rule {
                    product: Product::Mortgage,
                    reason: "homes".to_string(),
                    confidence: Confidence::Medium,
                },
                source: RuleSource::Category,
            }],
        }];
        let recs = rule_recommendations(&votes, 2, 3);
        assert_eq!(recs.len(), 1);
        assert!((recs[0].score - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(recs[0].reason, "homes");
        assert_eq!(recs[0].source, ScoreSource::Rules);
    }

    #[test]
    fn merge_keeps_higher_score() {
        let rec = |product: &str, score: f64, source| Recommendation {
            product: product.to_string(),
            score,
            source,
            reason: String::new(),
        };
        let mut merged = vec![rec("Deposit", 0.3, ScoreSource::Fallback)];
        merge_recommendation(&mut merged, rec("Deposit", 0.2, ScoreSource::Rules));
        assert_eq!(merged[0].source, ScoreSource::Fallback);
        merge_recommendation(&mut merged, rec("Deposit", 0.9, ScoreSource::Rules));
        assert_eq!(merged[0].source, ScoreSource::Rules);
        merge_recommendation(&mut merged, rec("Mortgage", 0.1, ScoreSource::Rules));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn empty_user_gets_valid_report() {
        let r = Recommender::new(EngineConfig::default());
        let report = r.process_user("u0", &EventTables::default());
        assert_eq!(report.graph_stats.nodes, 1);
        assert!(report.patterns.is_empty());
        assert_eq!(report.recommendations.len(), 3);
        assert!(report
            .recommendations
            .iter()
            .all(|rec| rec.source == ScoreSource::Fallback && !rec.reason.is_empty()));
    }

    #[test]
    fn viewing_user_gets_rule_votes() {
        let r = Recommender::new(EngineConfig::default());
        let report = r.process_user("u1", &viewer_tables());
        assert_eq!(report.patterns.first().map(String::as_str), Some("V→V→V"));
        assert!(report.recommendations.len() <= 3);
        assert!(report
            .recommendations
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
        let products: Vec<&str> = report.recommendations.iter().map(|r| r.product.as_str()).collect();
        let mut unique = products.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), products.len());
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.product == "Mortgage"));
    }

    #[test]
    fn graph_oracle_output_is_reported() {
        let report = with_oracles(false).process_user("u1", &browse_then_pay());
        assert_eq!(report.graph_analysis.as_deref(), Some("steady property interest"));
        assert_eq!(report.graph_rules.len(), 1);
        assert_eq!(report.graph_rules[0].product, Product::Deposit);
        assert!(report.graph_rules[0].reason.starts_with("paths: START"));
    }

    #[test]
    fn graph_oracle_output_is_empty_without_or_failing_oracle() {
        for r in [Recommender::new(EngineConfig::default()), with_oracles(true)] {
            let report = r.process_user("u1", &browse_then_pay());
            assert!(report.graph_analysis.is_none());
            assert!(report.graph_rules.is_empty());
            assert!(!report.recommendations.is_empty());
        }
    }

    #[test]
    fn empty_user_skips_graph_oracle() {
        let report = with_oracles(false).process_user("u0", &EventTables::default());
        assert!(report.graph_analysis.is_none());
        assert!(report.graph_rules.is_empty());
    }

    #[test]
    fn batch_is_ordered_by_user() {
        let mut users = BTreeMap::new();
        users.insert("b".to_string(), EventTables::default());
        users.insert("a".to_string(), EventTables::default());
        let reports = Recommender::new(EngineConfig::default()).process_users(&users);
        let ids: Vec<&str> = reports.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
