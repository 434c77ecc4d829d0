// Hybrid scorer: the deterministic fallback recommender.
//
// Three signal sets are computed over the product catalog:
//   base    = threshold rules on profile scalars, each product floored so it stays rankable
//   graph   = additive nudges from importance dominance, path lengths, density/degree, edge weights
//   pattern = additive nudges from code ratios and sub-pattern membership in the top patterns
// and fused with weights picked by which signals are available:
//   score = min(1, w_base*base + w_graph*graph + w_pattern*pattern)

use crate::analytics::GraphFeatures;
use crate::config::{EngineConfig, FusionWeights};
use crate::patterns::{FrequentPattern, PatternCode};
use crate::taxonomy;
use crate::types::{Product, RecommendationScore, UserProfile};
use serde::{Deserialize, Serialize};

const REAL_ESTATE: &str = "real_estate";

// --- base signal constants ---
const MORTGAGE_TOTAL_TX: f64 = 50_000.0;
const MORTGAGE_MIN_VIEWS: usize = 10;
const MORTGAGE_MIN_ITEMS: usize = 5;
const MORTGAGE_MIN_DAYS: i64 = 7;
const MORTGAGE_FLOOR: f64 = 0.1;
const CARD_MIN_PAYMENTS: usize = 5;
const CARD_AVG_TX_LOW: f64 = 1_000.0;
const CARD_AVG_TX_HIGH: f64 = 50_000.0;
const CARD_MIN_DAYS: i64 = 3;
const CARD_FLOOR: f64 = 0.2;
const DEPOSIT_TOTAL_TX: f64 = 100_000.0;
const DEPOSIT_MIN_PAYMENTS: usize = 10;
const DEPOSIT_AVG_TX: f64 = 10_000.0;
const DEPOSIT_FLOOR: f64 = 0.15;
const LOAN_MIN_VIEWS: usize = 15;
const LOAN_MIN_ITEMS: usize = 10;
const LOAN_MIN_DAYS: i64 = 5;
const LOAN_FLOOR: f64 = 0.1;
const DEBIT_ACTIVE: f64 = 0.25;
const DEBIT_INACTIVE: f64 = 0.3;

// --- graph signal constants ---
const BRAND_DOMINANCE: f64 = 1.5;
const ITEM_DOMINANCE: f64 = 2.0;
const MANY_BRAND_NODES: usize = 5;
const MANY_ITEM_NODES: usize = 10;
const TOP_CATEGORIES: usize = 3;
const LONG_AVG_PATH: f64 = 4.0;
const LONG_MAX_PATH: usize = 5;
const MANY_PATHS: usize = 15;
const DENSE: f64 = 0.3;
const SPARSE: f64 = 0.2;
const SPARSE_MIN_NODES: usize = 10;
const HIGH_AVG_DEGREE: f64 = 3.0;
const HEAVY_AVG_EDGE: f64 = 2.0;
const HEAVY_MAX_EDGE: f64 = 5.0;

// --- pattern signal constants ---
const PAY_DOMINANT: f64 = 0.5;
const VIEW_DOMINANT: f64 = 0.6;
const MANY_PAY_CODES: usize = 5;
const MANY_VIEW_CODES: usize = 10;
const SHAPE_MIN_REPEATS: usize = 3;
const SHORT_PATTERN: usize = 3;
const MANY_UNIQUE_PATTERNS: usize = 5;

/// One raw score per catalog product
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductScores([f64; Product::COUNT]);

impl ProductScores {
    pub fn get(&self, product: Product) -> f64 {
        self.0[product.index()]
    }

    pub fn set(&mut self, product: Product, value: f64) {
        self.0[product.index()] = value;
    }

    pub fn add(&mut self, product: Product, delta: f64) {
        self.0[product.index()] += delta;
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Product, f64)> + '_ {
        Product::ALL.iter().map(move |p| (*p, self.get(*p)))
    }
}

fn is_real_estate(category: Option<&str>) -> bool {
    category.is_some_and(|c| taxonomy::matches(c, REAL_ESTATE))
}

/// Base signal from profile scalars
pub fn base_signal(profile: &UserProfile) -> ProductScores {
    let mut s = ProductScores::default();

    let mut mortgage = 0.0;
    if profile.total_tx > MORTGAGE_TOTAL_TX {
        mortgage += 0.3;
    }
    if profile.num_views > MORTGAGE_MIN_VIEWS && profile.unique_items > MORTGAGE_MIN_ITEMS {
        mortgage += 0.25;
    }
    if profile.days_active > MORTGAGE_MIN_DAYS {
        mortgage += 0.2;
    }
    if is_real_estate(profile.top_category.as_deref()) {
        mortgage += 0.25;
    }
    s.set(Product::Mortgage, floor(mortgage, MORTGAGE_FLOOR));

    let mut card = 0.0;
    if profile.num_payments > CARD_MIN_PAYMENTS {
        card += 0.4;
    }
    if profile.avg_tx > CARD_AVG_TX_LOW && profile.avg_tx < CARD_AVG_TX_HIGH {
        card += 0.3;
    }
    if profile.days_active > CARD_MIN_DAYS {
        card += 0.2;
    }
    s.set(Product::CreditCard, floor(card, CARD_FLOOR));

    let mut deposit = 0.0;
    if profile.total_tx > DEPOSIT_TOTAL_TX {
        deposit += 0.5;
    }
    if profile.num_payments > DEPOSIT_MIN_PAYMENTS {
        deposit += 0.2;
    }
    if profile.avg_tx > DEPOSIT_AVG_TX {
        deposit += 0.2;
    }
    s.set(Product::Deposit, floor(deposit, DEPOSIT_FLOOR));

    let mut loan = 0.0;
    if profile.num_views > LOAN_MIN_VIEWS {
        loan += 0.4;
    }
    if profile.unique_items > LOAN_MIN_ITEMS {
        loan += 0.3;
    }
    if profile.days_active > LOAN_MIN_DAYS {
        loan += 0.2;
    }
    s.set(Product::ConsumerLoan, floor(loan, LOAN_FLOOR));

    let active = profile.num_payments > 0 || profile.num_views > 0;
    s.set(
        Product::DebitCard,
        if active { DEBIT_ACTIVE } else { DEBIT_INACTIVE },
    );

    s
}

fn floor(score: f64, min: f64) -> f64 {
    if score > 0.0 {
        score
    } else {
        min
    }
}

/// Graph signal from analytics features
pub fn graph_signal(features: &GraphFeatures) -> ProductScores {
    let mut s = ProductScores::default();
    if !features.has_signal() {
        return s;
    }

    let imp = &features.importance;
    if imp.brand_importance > imp.item_importance * BRAND_DOMINANCE {
        s.set(Product::CreditCard, 0.4);
        s.set(
            Product::Deposit,
            if imp.brand_nodes > MANY_BRAND_NODES { 0.35 } else { 0.25 },
        );
    } else if imp.item_importance > imp.brand_importance * ITEM_DOMINANCE {
        s.set(
            Product::Mortgage,
            if imp.item_nodes > MANY_ITEM_NODES { 0.4 } else { 0.3 },
        );
        s.set(Product::ConsumerLoan, 0.25);
    }

    if let Some((_, weight)) = imp
        .category_weights
        .iter()
        .take(TOP_CATEGORIES)
        .find(|(cat, _)| taxonomy::matches(cat, REAL_ESTATE))
    {
        s.add(Product::Mortgage, 0.2 * weight);
    }

    let paths = &features.paths;
    if paths.count() > 0 {
        if paths.avg() > LONG_AVG_PATH || paths.max() > LONG_MAX_PATH {
            s.add(Product::Mortgage, 0.25);
            s.add(Product::ConsumerLoan, 0.2);
        }
        if paths.count() > MANY_PATHS {
            s.add(Product::Mortgage, 0.15);
        }
    }

    let stats = &features.stats;
    if stats.density > DENSE {
        s.add(Product::CreditCard, 0.25);
        s.add(Product::DebitCard, 0.2);
    } else if stats.density < SPARSE && stats.nodes > SPARSE_MIN_NODES {
        s.add(Product::Mortgage, 0.2);
        s.add(Product::ConsumerLoan, 0.15);
    }
    if stats.avg_degree > HIGH_AVG_DEGREE {
        s.add(Product::CreditCard, 0.2);
    }

    let weights = &features.edge_weights;
    if weights.count > 0 && (weights.mean > HEAVY_AVG_EDGE || weights.max > HEAVY_MAX_EDGE) {
        s.add(Product::CreditCard, 0.15);
        s.add(Product::Deposit, 0.1);
    }

    s
}

/// Pattern signal from the top `top_n` mined patterns
pub fn pattern_signal(patterns: &[FrequentPattern], top_n: usize) -> ProductScores {
    let mut s = ProductScores::default();
    let top = &patterns[..patterns.len().min(top_n)];
    if top.is_empty() {
        return s;
    }

    let count = |code| top.iter().map(|p| p.count_of(code)).sum::<usize>();
    let views = count(PatternCode::View);
    let pays = count(PatternCode::Payment);
    let clicks = count(PatternCode::Click);
    let total = views + pays + clicks;

    let (view_ratio, pay_ratio) = if total > 0 {
        (views as f64 / total as f64, pays as f64 / total as f64)
    } else {
        (0.0, 0.0)
    };

    if total > 0 {
        if pay_ratio > PAY_DOMINANT {
            s.set(Product::CreditCard, 0.4);
            s.set(
                Product::Deposit,
                if pays > MANY_PAY_CODES { 0.4 } else { 0.3 },
            );
        } else if view_ratio > VIEW_DOMINANT {
            s.set(
                Product::Mortgage,
                if views > MANY_VIEW_CODES { 0.45 } else { 0.35 },
            );
            s.set(Product::ConsumerLoan, 0.25);
        } else if view_ratio > 0.3 && view_ratio < 0.6 && pay_ratio > 0.2 && pay_ratio < 0.5 {
            s.set(Product::CreditCard, 0.3);
            s.set(Product::Mortgage, 0.25);
        }
    }

    for p in top {
        let v = p.count_of(PatternCode::View);
        let pay = p.count_of(PatternCode::Payment);

        // exploration
        if p.contains("VVV") || v >= SHAPE_MIN_REPEATS {
            s.add(Product::Mortgage, 0.15);
            s.add(Product::ConsumerLoan, 0.1);
        }
        if p.contains("PPP") || (pay >= SHAPE_MIN_REPEATS && pay_ratio > PAY_DOMINANT) {
            s.add(Product::CreditCard, 0.2);
            s.add(Product::Deposit, 0.15);
        }
        // deliberation
        if p.contains("VPV") || p.contains("PVP") {
            s.add(Product::Mortgage, 0.2);
            s.add(Product::ConsumerLoan, 0.15);
        }
        // quick decision
        if p.len() <= SHORT_PATTERN && v > 0 && pay > 0 {
            s.add(Product::CreditCard, 0.15);
            s.add(Product::DebitCard, 0.1);
        }
    }

    let mut unique: Vec<&[PatternCode]> = top.iter().map(|p| p.codes.as_slice()).collect();
    unique.sort_unstable();
    unique.dedup();
    if unique.len() > MANY_UNIQUE_PATTERNS {
        s.add(Product::Mortgage, 0.1);
        s.add(Product::ConsumerLoan, 0.1);
    }

    s
}

/// Per-product contributions behind a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub weights: FusionWeights,
    pub base: ProductScores,
    pub graph: ProductScores,
    pub pattern: ProductScores,
    pub fused: ProductScores,
}

impl ScoreBreakdown {
    /// Products ordered by fused score; ties keep catalog order.
    pub fn ranked(&self) -> Vec<RecommendationScore> {
        let mut ranked: Vec<(Product, f64)> = self.fused.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .map(|(product, score)| RecommendationScore {
                product: product.name().to_string(),
                score,
            })
            .collect()
    }
}

/// Compute all three signals and fuse them.
pub fn score_breakdown(
    profile: &UserProfile,
    graph: Option<&GraphFeatures>,
    patterns: &[FrequentPattern],
    config: &EngineConfig,
) -> ScoreBreakdown {
    let has_graph = graph.is_some_and(GraphFeatures::has_signal);
    let has_patterns = !patterns.is_empty();
    let weights = config.fusion.select(has_graph, has_patterns);

    let base = base_signal(profile);
    let graph = match graph {
        Some(features) if has_graph => graph_signal(features),
        _ => ProductScores::default(),
    };
    let pattern = pattern_signal(patterns, config.patterns.top_patterns);

    let mut fused = ProductScores::default();
    for product in Product::ALL {
        let score = base.get(product) * weights.base
            + graph.get(product) * weights.graph
            + pattern.get(product) * weights.pattern;
        fused.set(product, score.clamp(0.0, 1.0));
    }

    ScoreBreakdown {
        weights,
        base,
        graph,
        pattern,
        fused,
    }
}

/// Ranked top-k products. Deterministic; never fails.
pub fn score_products(
    profile: &UserProfile,
    graph: Option<&GraphFeatures>,
    patterns: &[FrequentPattern],
    config: &EngineConfig,
    top_k: usize,
) -> Vec<RecommendationScore> {
    let breakdown = score_breakdown(profile, graph, patterns, config);
    tracing::debug!(
        user_id = %profile.user_id,
        base = breakdown.weights.base,
        graph = breakdown.weights.graph,
        pattern = breakdown.weights.pattern,
        "fusion weights selected"
    );
    let mut ranked = breakdown.ranked();
    ranked.truncate(top_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{EdgeWeightStats, GraphStats, ImportanceSummary, PathStats};
    use crate::patterns::{mine_patterns, PatternSequence};

    fn features(nodes: usize) -> GraphFeatures {
        GraphFeatures {
            stats: GraphStats {
                nodes,
                edges: 0,
                density: 0.25,
                avg_degree: 1.0,
                is_connected: true,
            },
            importance: ImportanceSummary::default(),
            paths: PathStats::default(),
            edge_weights: EdgeWeightStats::default(),
        }
    }

    #[test]
    fn base_floors_for_empty_profile() {
        let s = base_signal(&UserProfile::default());
        assert_eq!(s.get(Product::Mortgage), 0.1);
        assert_eq!(s.get(Product::CreditCard), 0.2);
        assert_eq!(s.get(Product::Deposit), 0.15);
        assert_eq!(s.get(Product::ConsumerLoan), 0.1);
        assert_eq!(s.get(Product::DebitCard), 0.3);
    }

    #[test]
    fn base_mortgage_rules() {
        let profile = UserProfile {
            total_tx: 60_000.0,
            num_views: 11,
            unique_items: 6,
            days_active: 8,
            top_category: Some("Ремонт квартиры".to_string()),
            ..UserProfile::default()
        };
        let s = base_signal(&profile);
        assert!((s.get(Product::Mortgage) - 1.0).abs() < 1e-12);
        assert_eq!(s.get(Product::DebitCard), 0.25);
    }

    #[test]
    fn empty_inputs_use_base_only() {
        let cfg = EngineConfig::default();
        let b = score_breakdown(&UserProfile::default(), None, &[], &cfg);
        assert_eq!(b.weights, cfg.fusion.base_only);
        assert!(b.graph.is_zero());
        assert!(b.pattern.is_zero());
        let ranked = b.ranked();
        assert_eq!(ranked[0].product, "Debit Card");
        assert_eq!(ranked[1].product, "Credit Card");
        assert_eq!(ranked[2].product, "Deposit");
        // Mortgage and Consumer Loan tie; catalog order decides
        assert_eq!(ranked[3].product, "Mortgage");
        assert_eq!(ranked[4].product, "Consumer Loan");
    }

    #[test]
    fn trivial_graph_counts_as_absent() {
        let cfg = EngineConfig::default();
        let b = score_breakdown(&UserProfile::default(), Some(&features(1)), &[], &cfg);
        assert_eq!(b.weights, cfg.fusion.base_only);
    }

    #[test]
    fn brand_dominance_favors_cards() {
        let mut f = features(4);
        f.importance = ImportanceSummary {
            brand_nodes: 6,
            brand_importance: 0.6,
            item_importance: 0.1,
            ..ImportanceSummary::default()
        };
        let s = graph_signal(&f);
        assert_eq!(s.get(Product::CreditCard), 0.4);
        assert_eq!(s.get(Product::Deposit), 0.35);
    }

    #[test]
    fn real_estate_category_weight_nudges_mortgage() {
        let mut f = features(4);
        f.importance = ImportanceSummary {
            item_nodes: 2,
            item_importance: 0.5,
            category_weights: vec![("Недвижимость".to_string(), 0.5)],
            ..ImportanceSummary::default()
        };
        let s = graph_signal(&f);
        assert!((s.get(Product::Mortgage) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn payment_heavy_patterns() {
        let patterns = mine_patterns(&PatternSequence::parse("PPPPPP"), 3, 1);
        let s = pattern_signal(&patterns, 10);
        // PPP, PPPP and PPPPP each add 0.2
        assert!((s.get(Product::CreditCard) - 1.0).abs() < 1e-9);
        assert!(s.get(Product::Deposit) > 0.4);
        assert_eq!(s.get(Product::Mortgage), 0.0);
    }

    #[test]
    fn alternating_patterns_favor_deliberation() {
        let patterns = mine_patterns(&PatternSequence::parse("VPVPV"), 3, 2);
        assert_eq!(patterns.len(), 1);
        let s = pattern_signal(&patterns, 10);
        // view ratio 2/3 -> mortgage 0.35, then VPV +0.2
        assert!((s.get(Product::Mortgage) - 0.55).abs() < 1e-12);
        assert!((s.get(Product::CreditCard) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn output_bounded_and_sorted() {
        let profile = UserProfile {
            total_tx: 1e7,
            num_payments: 50,
            avg_tx: 20_000.0,
            days_active: 30,
            num_views: 40,
            unique_items: 30,
            ..UserProfile::default()
        };
        let patterns = mine_patterns(&PatternSequence::parse("PPPPVVVVPVPVPPPP"), 3, 1);
        let mut f = features(20);
        f.stats.density = 0.5;
        f.stats.avg_degree = 5.0;
        let out = score_products(&profile, Some(&f), &patterns, &EngineConfig::default(), 3);
        assert_eq!(out.len(), 3);
        for pair in out.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(out.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }
}
