use nbo_engine::error::NboError;
use nbo_engine::rules::{
    Confidence, OracleContext, Rule, RuleCache, RuleEngine, RuleOracle, RuleSource,
};
use nbo_engine::types::{Product, UserProfile};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Oracle {
    calls: Arc<AtomicUsize>,
    answer: Option<Product>,
}

impl RuleOracle for Oracle {
    fn generate_rule(&self, pattern: &str, _ctx: &OracleContext) -> Result<Rule, NboError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Some(product) => Ok(Rule {
                product,
                reason: format!("oracle on {}", pattern),
                confidence: Confidence::High,
            }),
            None => Err(NboError::Oracle("service unavailable".to_string())),
        }
    }
}

fn engine_with(cache: RuleCache, answer: Option<Product>) -> (RuleEngine, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = RuleEngine::new(cache).with_oracle(Box::new(Oracle {
        calls: calls.clone(),
        answer,
    }));
    (engine, calls)
}

fn profile(category: &str) -> UserProfile {
    UserProfile {
        top_category: Some(category.to_string()),
        ..UserProfile::default()
    }
}

#[test]
fn cached_pattern_never_reaches_oracle() {
    let cache = RuleCache::new();
    let rule = Rule {
        product: Product::Deposit,
        reason: "saves regularly".to_string(),
        confidence: Confidence::Medium,
    };
    cache.insert("P→C→P", rule.clone());
    let (engine, calls) = engine_with(cache, Some(Product::Mortgage));

    for _ in 0..3 {
        let m = engine.match_pattern("P→C→P", &UserProfile::default()).unwrap();
        assert_eq!(m.rule, rule);
        assert_eq!(m.source, RuleSource::Cache);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn oracle_answer_is_cached_for_next_time() {
    let (engine, calls) = engine_with(RuleCache::new(), Some(Product::DebitCard));
    let first = engine.match_pattern("C→C→C", &UserProfile::default()).unwrap();
    assert_eq!(first.source, RuleSource::Oracle);
    let second = engine.match_pattern("C→C→C", &UserProfile::default()).unwrap();
    assert_eq!(second.source, RuleSource::Cache);
    assert_eq!(second.rule, first.rule);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.cache().is_dirty());
}

#[test]
fn oracle_failure_degrades_to_low_confidence() {
    let (engine, calls) = engine_with(RuleCache::new(), None);
    for _ in 0..2 {
        let m = engine.match_pattern("C→A→O", &UserProfile::default()).unwrap();
        assert_eq!(m.source, RuleSource::Fallback);
        assert_eq!(m.rule.confidence, Confidence::Low);
        assert_eq!(m.rule.product, Product::CreditCard);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(engine.cache().is_empty());
}

#[test]
fn category_rules_are_wording_tolerant() {
    let engine = RuleEngine::default();
    for raw in ["REAL ESTATE", "Недвижимость", "квартира и ремонт", "real_estate"] {
        let m = engine.match_pattern("C→A→O", &profile(raw)).unwrap();
        assert_eq!(m.rule.product, Product::Mortgage, "category {:?}", raw);
        assert_eq!(m.source, RuleSource::Category);
    }
    let m = engine.match_pattern("C→A→O", &profile("Авиабилеты и отели")).unwrap();
    assert_eq!(m.rule.product, Product::CreditCard);
}

#[test]
fn shape_rules_catch_unknown_categories() {
    let engine = RuleEngine::default();
    let m = engine.match_pattern("V→V→V→P", &profile("zzz")).unwrap();
    assert_eq!(m.source, RuleSource::Shape);
    assert_eq!(m.rule.product, Product::Mortgage);
    assert_eq!(m.rule.confidence, Confidence::Low);

    // no heuristic, no oracle
    assert!(engine.match_pattern("C→A→O", &profile("zzz")).is_none());
}

#[test]
fn votes_sum_confidence_weights() {
    let engine = RuleEngine::default();
    let patterns: Vec<String> = ["V→V→V", "P→P→P", "P→P→P→P", "C→A→O"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let votes = engine.recommend_from_patterns(&patterns, &profile("zzz"));
    assert_eq!(votes.len(), 2);
    assert_eq!(votes[0].product, Product::CreditCard);
    assert_eq!(votes[0].score, 2);
    assert_eq!(votes[0].reasons.len(), 2);
    assert_eq!(votes[1].product, Product::Mortgage);
    assert_eq!(votes[1].score, 1);
}

#[test]
fn cache_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("rules.json");

    let (engine, _) = engine_with(RuleCache::new(), Some(Product::ConsumerLoan));
    engine.match_pattern("A→A→A", &UserProfile::default()).unwrap();
    engine.cache().save(&path).unwrap();
    assert!(!engine.cache().is_dirty());

    let loaded = RuleCache::load(&path).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.get("A→A→A").unwrap().product, Product::ConsumerLoan);

    let (reloaded, calls) = engine_with(loaded, None);
    let m = reloaded.match_pattern("A→A→A", &UserProfile::default()).unwrap();
    assert_eq!(m.source, RuleSource::Cache);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_cache_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cache = RuleCache::load(&dir.path().join("absent.json")).unwrap();
    assert!(cache.is_empty());
}

#[test]
fn corrupt_cache_file_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(matches!(RuleCache::load(&path), Err(NboError::Parse(_))));
}
