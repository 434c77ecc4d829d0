use chrono::{DateTime, Duration, TimeZone, Utc};
use nbo_engine::analytics::{self, GraphStats};
use nbo_engine::config::{AnalyticsConfig, GraphConfig};
use nbo_engine::graph::{build_graph_at, BehaviorGraph, NodeKey};
use nbo_engine::types::{ActionType, Domain, Event, EventTables};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn sample_graph() -> BehaviorGraph {
    let mut events = Vec::new();
    for (i, cat) in ["food", "auto", "food", "travel", "food"].iter().enumerate() {
        events.push(
            Event::new("u1", Domain::Marketplace)
                .action(ActionType::View)
                .category(cat)
                .at(t0() + Duration::minutes(i as i64 * 15)),
        );
    }
    events.push(
        Event::new("u1", Domain::Payments)
            .action(ActionType::Transaction)
            .brand("b1")
            .amount(-900.0)
            .at(t0() + Duration::hours(2)),
    );
    events.push(
        Event::new("u1", Domain::Receipts)
            .category("Food")
            .brand("b1")
            .amount(400.0)
            .at(t0() + Duration::hours(3)),
    );
    build_graph_at(&EventTables::from_events(events), "u1", &GraphConfig::default(), t0())
}

#[test]
fn start_only_graph() {
    let g = BehaviorGraph::new("new-user");
    let stats = analytics::graph_stats(&g);
    assert_eq!(
        stats,
        GraphStats {
            nodes: 1,
            edges: 0,
            density: 0.0,
            avg_degree: 0.0,
            is_connected: false,
        }
    );
    assert!(analytics::graph_importance(&g, &AnalyticsConfig::default()).is_empty());

    let features = analytics::analyze(&g, &AnalyticsConfig::default());
    assert!(!features.has_signal());
    assert_eq!(features.paths.count(), 0);
    assert_eq!(analytics::describe_graph(&g, 5), "empty graph");
    assert!(analytics::path_patterns(&g, 6).is_empty());
}

#[test]
fn stats_are_idempotent() {
    let g = sample_graph();
    let config = AnalyticsConfig::default();
    assert_eq!(analytics::graph_stats(&g), analytics::graph_stats(&g));
    assert_eq!(
        analytics::graph_importance(&g, &config),
        analytics::graph_importance(&g, &config)
    );
    assert_eq!(analytics::analyze(&g, &config), analytics::analyze(&g, &config));
}

#[test]
fn stats_of_sample_graph() {
    let g = sample_graph();
    let stats = analytics::graph_stats(&g);
    // START + 3 categories + brand + brand/category
    assert_eq!(stats.nodes, 6);
    assert!(stats.is_connected);
    assert!(stats.density > 0.0 && stats.density <= 1.0);
    let expected = 2.0 * stats.edges as f64 / stats.nodes as f64;
    assert!((stats.avg_degree - expected).abs() < 1e-12);
}

#[test]
fn importance_is_a_distribution() {
    let g = sample_graph();
    let importance = analytics::graph_importance(&g, &AnalyticsConfig::default());
    assert_eq!(importance.len(), g.node_count());
    let total: f64 = importance.values().sum();
    assert!((total - 1.0).abs() < 1e-6, "total {}", total);
    assert!(importance.values().all(|v| *v > 0.0));

    // START only has outgoing edges, so something downstream outranks it
    let top = analytics::top_nodes(&importance, 1);
    assert_ne!(top[0].0, NodeKey::Start);
}

#[test]
fn importance_summary_splits_kinds() {
    let g = sample_graph();
    let importance = analytics::graph_importance(&g, &AnalyticsConfig::default());
    let summary = analytics::summarize_importance(&g, &importance, 0.01);
    assert_eq!(summary.item_nodes, 3);
    assert_eq!(summary.brand_nodes, 2);
    assert!(summary.item_importance > 0.0);
    assert!(summary.brand_importance > 0.0);
    assert!(summary
        .category_weights
        .windows(2)
        .all(|w| w[0].1 >= w[1].1));
}

#[test]
fn paths_respect_cutoff() {
    let g = sample_graph();
    let config = AnalyticsConfig {
        path_cutoff: 2,
        ..AnalyticsConfig::default()
    };
    let paths = analytics::path_stats(&g, &config);
    assert!(paths.count() > 0);
    // lengths are in nodes: at most cutoff + 1
    assert!(paths.max() <= 3);
    assert!(paths.avg() >= 2.0);

    for p in analytics::path_patterns(&g, 6) {
        assert!(p.starts_with("START → "), "{}", p);
    }
}

#[test]
fn summary_mentions_size() {
    let g = sample_graph();
    let summary = analytics::describe_graph(&g, 5);
    assert!(summary.contains("size:6n"), "{}", summary);
    assert!(summary.contains("cats:"), "{}", summary);
}

#[test]
fn edge_weights() {
    let g = sample_graph();
    let stats = analytics::edge_weight_stats(&g);
    assert_eq!(stats.count, g.edge_count());
    assert!(stats.max >= stats.mean);
    assert!(stats.mean > 0.0);
}
