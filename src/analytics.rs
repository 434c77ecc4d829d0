// Graph analytics: descriptive statistics, weighted PageRank importance,
// bounded simple-path statistics and edge-weight statistics.
//
// Every function here is a pure function of the graph; none of them fail.

use crate::config::AnalyticsConfig;
use crate::graph::{BehaviorGraph, NodeKey, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Targets used by `path_patterns`
const PATH_PATTERN_TARGETS: usize = 5;
const PATH_PATTERNS_PER_TARGET: usize = 2;
const PATH_PATTERN_BUDGET: usize = 1_000;
/// Label length cap inside path patterns
const LABEL_MAX: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub avg_degree: f64,
    pub is_connected: bool,
}

/// Descriptive statistics. A START-only graph is reported as disconnected.
pub fn graph_stats(graph: &BehaviorGraph) -> GraphStats {
    let nodes = graph.node_count();
    let edges = graph.edge_count();

    let density = if nodes > 1 {
        edges as f64 / (nodes as f64 * (nodes as f64 - 1.0))
    } else {
        0.0
    };

    let avg_degree = if nodes > 0 {
        let total: usize = graph.degrees().iter().map(|(i, o)| i + o).sum();
        total as f64 / nodes as f64
    } else {
        0.0
    };

    GraphStats {
        nodes,
        edges,
        density,
        avg_degree,
        is_connected: nodes > 1 && is_weakly_connected(graph),
    }
}

fn is_weakly_connected(graph: &BehaviorGraph) -> bool {
    let n = graph.node_count();
    if n == 0 {
        return false;
    }
    let mut undirected = vec![Vec::new(); n];
    for e in graph.edges() {
        undirected[e.from].push(e.to);
        undirected[e.to].push(e.from);
    }
    let mut seen = vec![false; n];
    let mut queue = VecDeque::from([0usize]);
    seen[0] = true;
    let mut visited = 1;
    while let Some(node) = queue.pop_front() {
        for &next in &undirected[node] {
            if !seen[next] {
                seen[next] = true;
                visited += 1;
                queue.push_back(next);
            }
        }
    }
    visited == n
}

/// Weighted PageRank by power iteration.
///
/// Transitions follow edge weight over total out-weight; dangling mass is
/// spread uniformly. Stops on convergence or after `max_iterations` and
/// returns the last iterate either way. Graphs with at most one node give an
/// empty mapping.
pub fn graph_importance(graph: &BehaviorGraph, config: &AnalyticsConfig) -> BTreeMap<NodeKey, f64> {
    let n = graph.node_count();
    if n <= 1 {
        return BTreeMap::new();
    }

    let mut out_weight = vec![0.0f64; n];
    for e in graph.edges() {
        if e.weight > 0.0 {
            out_weight[e.from] += e.weight;
        }
    }

    let d = config.damping;
    let teleport = (1.0 - d) / n as f64;
    let mut scores = vec![1.0 / n as f64; n];
    let mut next = vec![0.0f64; n];
    let mut converged = false;

    for _ in 0..config.max_iterations {
        let dangling: f64 = (0..n)
            .filter(|&i| out_weight[i] <= 0.0)
            .map(|i| scores[i])
            .sum();
        let dangling_share = d * dangling / n as f64;

        next.iter_mut().for_each(|s| *s = teleport + dangling_share);
        for e in graph.edges() {
            if e.weight > 0.0 && out_weight[e.from] > 0.0 {
                next[e.to] += d * scores[e.from] * e.weight / out_weight[e.from];
            }
        }

        let diff: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut scores, &mut next);
        if diff < n as f64 * config.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(
            user_id = %graph.user_id,
            iterations = config.max_iterations,
            "importance iteration did not converge, using last iterate"
        );
    }

    graph
        .nodes()
        .iter()
        .zip(scores)
        .map(|(node, score)| (node.key.clone(), score))
        .collect()
}

/// Importance of the nodes above the threshold, grouped by node role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportanceSummary {
    pub item_nodes: usize,
    pub brand_nodes: usize,
    pub item_importance: f64,
    pub brand_importance: f64,
    /// Category totals over item-like nodes, largest first
    pub category_weights: Vec<(String, f64)>,
    /// Brand totals over brand-like nodes, largest first
    pub brand_weights: Vec<(String, f64)>,
}

pub fn summarize_importance(
    graph: &BehaviorGraph,
    importance: &BTreeMap<NodeKey, f64>,
    threshold: f64,
) -> ImportanceSummary {
    let mut summary = ImportanceSummary::default();
    let mut categories: Vec<(String, f64)> = Vec::new();
    let mut brands: Vec<(String, f64)> = Vec::new();

    for node in graph.nodes() {
        let imp = importance.get(&node.key).copied().unwrap_or(0.0);
        if imp <= threshold {
            continue;
        }
        let kind = node.attrs.kind;
        if kind.is_item_like() {
            summary.item_nodes += 1;
            summary.item_importance += imp;
            if let Some(cat) = &node.attrs.category {
                add_weight(&mut categories, cat, imp);
            }
        } else if kind.is_brand_like() {
            summary.brand_nodes += 1;
            summary.brand_importance += imp;
            if let Some(brand) = &node.attrs.brand_id {
                add_weight(&mut brands, brand, imp);
            }
        }
    }

    sort_desc(&mut categories);
    sort_desc(&mut brands);
    summary.category_weights = categories;
    summary.brand_weights = brands;
    summary
}

fn add_weight(acc: &mut Vec<(String, f64)>, key: &str, weight: f64) {
    match acc.iter_mut().find(|(k, _)| k == key) {
        Some((_, w)) => *w += weight,
        None => acc.push((key.to_string(), weight)),
    }
}

fn sort_desc(v: &mut [(String, f64)]) {
    v.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// Simple-path statistics from START. Lengths are counted in nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathStats {
    pub lengths: Vec<usize>,
}

impl PathStats {
    pub fn count(&self) -> usize {
        self.lengths.len()
    }

    pub fn avg(&self) -> f64 {
        if self.lengths.is_empty() {
            return 0.0;
        }
        self.lengths.iter().sum::<usize>() as f64 / self.lengths.len() as f64
    }

    pub fn max(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0)
    }
}

/// Nodes reachable from START in breadth-first order
pub fn reachable_from_start(graph: &BehaviorGraph) -> Vec<usize> {
    let adj = graph.out_adjacency();
    let mut seen = vec![false; graph.node_count()];
    let mut order = Vec::new();
    if adj.is_empty() {
        return order;
    }
    seen[BehaviorGraph::START] = true;
    let mut queue = VecDeque::from([BehaviorGraph::START]);
    while let Some(node) = queue.pop_front() {
        for &next in &adj[node] {
            if !seen[next] {
                seen[next] = true;
                order.push(next);
                queue.push_back(next);
            }
        }
    }
    order
}

/// Enumerate simple paths `source -> target` of at most `cutoff` edges.
///
/// Iterative DFS with an explicit stack; stops after `limit` paths or after
/// `budget` edge expansions, whichever comes first.
pub fn simple_paths(
    adj: &[Vec<usize>],
    source: usize,
    target: usize,
    cutoff: usize,
    limit: usize,
    budget: usize,
) -> Vec<Vec<usize>> {
    let mut found = Vec::new();
    if source == target || cutoff == 0 || limit == 0 || source >= adj.len() {
        return found;
    }

    let mut on_path = vec![false; adj.len()];
    let mut path = vec![source];
    let mut cursor = vec![0usize];
    on_path[source] = true;
    let mut expansions = 0usize;

    while let Some(&node) = path.last() {
        let top = path.len() - 1;
        let next = cursor[top];
        if next >= adj[node].len() || path.len() > cutoff {
            on_path[node] = false;
            path.pop();
            cursor.pop();
            continue;
        }
        cursor[top] += 1;

        let child = adj[node][next];
        if on_path[child] {
            continue;
        }
        expansions += 1;
        if expansions > budget {
            break;
        }
        if child == target {
            let mut p = path.clone();
            p.push(child);
            found.push(p);
            if found.len() >= limit {
                break;
            }
            continue;
        }
        path.push(child);
        cursor.push(0);
        on_path[child] = true;
    }
    found
}

pub fn path_stats(graph: &BehaviorGraph, config: &AnalyticsConfig) -> PathStats {
    let adj = graph.out_adjacency();
    let mut lengths = Vec::new();
    for target in reachable_from_start(graph)
        .into_iter()
        .take(config.path_targets)
    {
        let paths = simple_paths(
            &adj,
            BehaviorGraph::START,
            target,
            config.path_cutoff,
            config.paths_per_target,
            config.path_expansion_budget,
        );
        lengths.extend(paths.iter().map(Vec::len));
    }
    PathStats { lengths }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeWeightStats {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
}

pub fn edge_weight_stats(graph: &BehaviorGraph) -> EdgeWeightStats {
    let edges = graph.edges();
    if edges.is_empty() {
        return EdgeWeightStats::default();
    }
    let sum: f64 = edges.iter().map(|e| e.weight).sum();
    let max = edges.iter().map(|e| e.weight).fold(f64::MIN, f64::max);
    EdgeWeightStats {
        count: edges.len(),
        mean: sum / edges.len() as f64,
        max,
    }
}

/// Everything the hybrid scorer reads from a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFeatures {
    pub stats: GraphStats,
    pub importance: ImportanceSummary,
    pub paths: PathStats,
    pub edge_weights: EdgeWeightStats,
}

impl GraphFeatures {
    /// True when the graph holds anything besides START
    pub fn has_signal(&self) -> bool {
        self.stats.nodes > 1
    }
}

pub fn analyze(graph: &BehaviorGraph, config: &AnalyticsConfig) -> GraphFeatures {
    let stats = graph_stats(graph);
    let importance = graph_importance(graph, config);
    let summary = summarize_importance(graph, &importance, config.importance_threshold);
    let paths = path_stats(graph, config);
    let edge_weights = edge_weight_stats(graph);

    tracing::debug!(
        user_id = %graph.user_id,
        nodes = stats.nodes,
        edges = stats.edges,
        paths = paths.count(),
        "graph analyzed"
    );

    GraphFeatures {
        stats,
        importance: summary,
        paths,
        edge_weights,
    }
}

fn node_label(graph: &BehaviorGraph, idx: usize) -> String {
    let Some(node) = graph.node(idx) else {
        return "?".to_string();
    };
    let attrs = &node.attrs;
    match attrs.kind {
        NodeKind::Start => "START".to_string(),
        NodeKind::Category | NodeKind::Item => format!(
            "Cat_{}",
            attrs
                .category
                .as_deref()
                .or(attrs.item_id.as_deref())
                .unwrap_or("?")
        ),
        NodeKind::Brand | NodeKind::BrandCategory => {
            let brand = attrs.brand_id.as_deref().unwrap_or("?");
            match attrs.category.as_deref() {
                Some(cat) => format!("Brand_{}_{}", brand, crate::util::truncate(cat, 10)),
                None => format!("Brand_{}", brand),
            }
        }
    }
}

/// Readable START-rooted paths (`START → Cat_food → Brand_b1`), at most
/// five, each with at least three nodes.
pub fn path_patterns(graph: &BehaviorGraph, max_len: usize) -> Vec<String> {
    let adj = graph.out_adjacency();
    let mut out = Vec::new();
    for target in reachable_from_start(graph)
        .into_iter()
        .take(PATH_PATTERN_TARGETS)
    {
        let paths = simple_paths(
            &adj,
            BehaviorGraph::START,
            target,
            max_len,
            PATH_PATTERNS_PER_TARGET,
            PATH_PATTERN_BUDGET,
        );
        for path in paths.into_iter().filter(|p| p.len() >= 3) {
            let labels: Vec<String> = path
                .iter()
                .map(|&i| crate::util::truncate(&node_label(graph, i), LABEL_MAX))
                .collect();
            out.push(labels.join(" → "));
        }
    }
    out.truncate(PATH_PATTERN_TARGETS);
    out
}

/// Compact one-line summary of a graph for oracle prompts:
/// node-type counts, top categories, top brands by amount, heaviest edges, size.
pub fn describe_graph(graph: &BehaviorGraph, max_nodes: usize) -> String {
    if graph.is_trivial() {
        return "empty graph".to_string();
    }

    let mut kinds: Vec<(&'static str, usize)> = Vec::new();
    let mut categories: Vec<(String, f64)> = Vec::new();
    let mut brands: Vec<(String, f64)> = Vec::new();

    for node in graph.nodes() {
        let kind = node.attrs.kind.as_str();
        match kinds.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, c)) => *c += 1,
            None => kinds.push((kind, 1)),
        }
        if node.attrs.kind.is_item_like() {
            if let Some(cat) = &node.attrs.category {
                add_weight(&mut categories, cat, 1.0);
            }
        } else if node.attrs.kind.is_brand_like() {
            if let Some(brand) = &node.attrs.brand_id {
                add_weight(&mut brands, brand, node.attrs.amount.unwrap_or(0.0).abs());
            }
        }
    }
    kinds.sort_by(|a, b| b.1.cmp(&a.1));
    sort_desc(&mut categories);
    sort_desc(&mut brands);

    let mut parts = Vec::new();
    let kind_parts: Vec<String> = kinds
        .iter()
        .take(3)
        .map(|(k, c)| format!("{}:{}", k, c))
        .collect();
    parts.push(format!("types:{}", kind_parts.join(",")));

    let top = max_nodes.min(3);
    if !categories.is_empty() {
        let cats: Vec<String> = categories
            .iter()
            .take(top)
            .map(|(c, n)| format!("{}:{}", crate::util::truncate(c, 15), n))
            .collect();
        parts.push(format!("cats:{}", cats.join(",")));
    }
    if !brands.is_empty() {
        let bs: Vec<String> = brands
            .iter()
            .take(top)
            .map(|(b, amt)| format!("{}:${:.0}", b, amt))
            .collect();
        parts.push(format!("brands:{}", bs.join(",")));
    }

    let mut edges: Vec<_> = graph.edges().iter().collect();
    edges.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    if !edges.is_empty() {
        let initial = |idx: usize| -> char {
            graph
                .node(idx)
                .and_then(|n| n.attrs.kind.as_str().chars().next())
                .unwrap_or('?')
        };
        let es: Vec<String> = edges
            .iter()
            .take(top)
            .map(|e| format!("{}→{}:{:.1}", initial(e.from), initial(e.to), e.weight))
            .collect();
        parts.push(format!("edges:{}", es.join(",")));
    }

    let stats = graph_stats(graph);
    parts.push(format!(
        "size:{}n,{}e,{:.1}deg",
        stats.nodes, stats.edges, stats.avg_degree
    ));
    parts.join("|")
}

/// Node keys ranked by importance, largest first
pub fn top_nodes(importance: &BTreeMap<NodeKey, f64>, n: usize) -> Vec<(NodeKey, f64)> {
    let mut ranked: Vec<(NodeKey, f64)> = importance
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(n);
    ranked
}

/// Node count per kind, for reporting
pub fn kind_counts(graph: &BehaviorGraph) -> HashMap<NodeKind, usize> {
    let mut counts = HashMap::new();
    for node in graph.nodes() {
        *counts.entry(node.attrs.kind).or_insert(0) += 1;
    }
    counts
}
