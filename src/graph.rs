// Behavior graph builder.
//
// Raw events are first compressed per domain into interaction groups
// (category+action, brand, category+brand), truncated to the most significant
// groups, then laid out on a timeline. Each group becomes a node; temporal
// edges link it to groups that happened shortly before it, and START links
// to every node once.

use crate::config::GraphConfig;
use crate::types::{ActionType, Domain, Event, EventTables};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Brand id used when a payment or receipt row has none
pub const UNKNOWN_BRAND: &str = "unknown";
/// Item id used when a row has neither category nor item
pub const UNKNOWN_ITEM: &str = "unknown";

/// Structural identity of a graph node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKey {
    Start,
    Category { domain: Domain, value: String },
    Item { domain: Domain, id: String },
    Brand { id: String },
    BrandCategory { brand: String, category: String },
}

impl NodeKey {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeKey::Start => NodeKind::Start,
            NodeKey::Category { .. } => NodeKind::Category,
            NodeKey::Item { .. } => NodeKind::Item,
            NodeKey::Brand { .. } => NodeKind::Brand,
            NodeKey::BrandCategory { .. } => NodeKind::BrandCategory,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Start => write!(f, "START"),
            NodeKey::Category { domain, value } => write!(f, "category:{}:{}", domain, value),
            NodeKey::Item { domain, id } => write!(f, "item:{}:{}", domain, id),
            NodeKey::Brand { id } => write!(f, "brand:{}", id),
            NodeKey::BrandCategory { brand, category } => {
                write!(f, "brand_category:{}:{}", brand, category)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Category,
    Item,
    Brand,
    BrandCategory,
}

impl NodeKind {
    /// Browsing-side nodes (what the user looked at)
    pub fn is_item_like(&self) -> bool {
        matches!(self, NodeKind::Category | NodeKind::Item)
    }

    /// Spending-side nodes (where the user paid)
    pub fn is_brand_like(&self) -> bool {
        matches!(self, NodeKind::Brand | NodeKind::BrandCategory)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Category => "category",
            NodeKind::Item => "item",
            NodeKind::Brand => "brand",
            NodeKind::BrandCategory => "brand_category",
        }
    }
}

/// Node attributes; the latest group mapped onto a node wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttrs {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
}

impl NodeAttrs {
    fn start() -> Self {
        Self {
            kind: NodeKind::Start,
            category: None,
            brand_id: None,
            item_id: None,
            amount: None,
            domain: None,
            action_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: NodeKey,
    pub attrs: NodeAttrs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    /// Accumulated over repeated transitions
    pub weight: f64,
    /// Seconds between the two events when the edge was first created
    pub time_diff: f64,
}

/// Directed weighted behavior graph for one user.
///
/// Nodes and edges keep insertion order so every traversal is deterministic.
/// Index 0 is always `START`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "GraphRepr")]
pub struct BehaviorGraph {
    pub user_id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(skip)]
    node_index: HashMap<NodeKey, usize>,
    #[serde(skip)]
    edge_index: HashMap<(usize, usize), usize>,
}

impl BehaviorGraph {
    pub const START: usize = 0;

    /// A graph holding only the START node
    pub fn new(user_id: &str) -> Self {
        let mut graph = Self {
            user_id: user_id.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            node_index: HashMap::new(),
            edge_index: HashMap::new(),
        };
        graph.upsert_node(NodeKey::Start, NodeAttrs::start());
        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// True when nothing besides START was added
    pub fn is_trivial(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn index_of(&self, key: &NodeKey) -> Option<usize> {
        self.node_index.get(key).copied()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.node_index.contains_key(key)
    }

    pub fn edge(&self, from: &NodeKey, to: &NodeKey) -> Option<&Edge> {
        let f = self.index_of(from)?;
        let t = self.index_of(to)?;
        self.edge_index.get(&(f, t)).map(|&e| &self.edges[e])
    }

    pub fn has_edge_idx(&self, from: usize, to: usize) -> bool {
        self.edge_index.contains_key(&(from, to))
    }

    /// Outgoing adjacency lists in edge insertion order
    pub fn out_adjacency(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for e in &self.edges {
            adj[e.from].push(e.to);
        }
        adj
    }

    /// (in_degree, out_degree) per node; a self-loop counts on both sides
    pub fn degrees(&self) -> Vec<(usize, usize)> {
        let mut deg = vec![(0usize, 0usize); self.nodes.len()];
        for e in &self.edges {
            deg[e.from].1 += 1;
            deg[e.to].0 += 1;
        }
        deg
    }

    /// Insert a node or overwrite the attributes of an existing one.
    /// Returns the node index and whether it was newly created.
    pub fn upsert_node(&mut self, key: NodeKey, attrs: NodeAttrs) -> (usize, bool) {
        if let Some(&idx) = self.node_index.get(&key) {
            self.nodes[idx].attrs = attrs;
            return (idx, false);
        }
        let idx = self.nodes.len();
        self.node_index.insert(key.clone(), idx);
        self.nodes.push(Node { key, attrs });
        (idx, true)
    }

    /// Add an edge, or add `weight` onto the existing edge between the pair.
    pub fn add_or_accumulate_edge(&mut self, from: usize, to: usize, weight: f64, time_diff: f64) {
        if let Some(&e) = self.edge_index.get(&(from, to)) {
            self.edges[e].weight += weight;
            return;
        }
        self.edge_index.insert((from, to), self.edges.len());
        self.edges.push(Edge {
            from,
            to,
            weight,
            time_diff,
        });
    }

    fn reindex(&mut self) {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.key.clone(), i))
            .collect();
        self.edge_index = self
            .edges
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.from, e.to), i))
            .collect();
    }
}

/// Serialized form; lookup tables are rebuilt on load
#[derive(Deserialize)]
struct GraphRepr {
    user_id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl From<GraphRepr> for BehaviorGraph {
    fn from(repr: GraphRepr) -> Self {
        let mut graph = Self {
            user_id: repr.user_id,
            nodes: repr.nodes,
            edges: repr.edges,
            node_index: HashMap::new(),
            edge_index: HashMap::new(),
        };
        graph.reindex();
        graph
    }
}

/// One aggregated interaction group placed on the timeline
#[derive(Debug, Clone)]
struct TimelineEvent {
    timestamp: DateTime<Utc>,
    action: ActionType,
    domain: Domain,
    category: Option<String>,
    item_id: Option<String>,
    brand_id: Option<String>,
    amount: Option<f64>,
    weight: f64,
}

impl TimelineEvent {
    fn node(&self) -> (NodeKey, NodeAttrs) {
        let mut attrs = NodeAttrs {
            kind: NodeKind::Start,
            category: self.category.clone(),
            brand_id: self.brand_id.clone(),
            item_id: self.item_id.clone(),
            amount: self.amount,
            domain: Some(self.domain),
            action_type: Some(self.action),
        };

        if is_spend_action(self.action) {
            let brand = self
                .brand_id
                .clone()
                .unwrap_or_else(|| UNKNOWN_BRAND.to_string());
            let key = match &self.category {
                Some(category) => NodeKey::BrandCategory {
                    brand,
                    category: category.clone(),
                },
                None => NodeKey::Brand { id: brand },
            };
            attrs.kind = key.kind();
            return (key, attrs);
        }

        let key = match &self.category {
            Some(category) => NodeKey::Category {
                domain: self.domain,
                value: category.clone(),
            },
            None => NodeKey::Item {
                domain: self.domain,
                id: self
                    .item_id
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ITEM.to_string()),
            },
        };
        attrs.kind = key.kind();
        (key, attrs)
    }
}

fn is_spend_action(action: ActionType) -> bool {
    matches!(action, ActionType::Transaction | ActionType::Purchase)
}

/// Running aggregate for one group key
#[derive(Debug, Clone)]
struct Group {
    count: usize,
    last_timestamp: DateTime<Utc>,
    item_id: Option<String>,
    brand_id: Option<String>,
    total_amount: f64,
}

impl Group {
    fn new(event: &Event, now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            last_timestamp: event.timestamp_or(now),
            item_id: None,
            brand_id: None,
            total_amount: 0.0,
        }
    }

    fn absorb(&mut self, event: &Event, now: DateTime<Utc>) {
        self.count += 1;
        let ts = event.timestamp_or(now);
        if ts > self.last_timestamp {
            self.last_timestamp = ts;
        }
        if self.item_id.is_none() {
            self.item_id = event.item_str().map(String::from);
        }
        if self.brand_id.is_none() {
            self.brand_id = event.brand_str().map(String::from);
        }
        self.total_amount += event.abs_amount();
    }
}

/// Group events by key, preserving first-seen order of keys.
fn group_by<K, F>(events: &[Event], now: DateTime<Utc>, mut key_fn: F) -> Vec<(K, Group)>
where
    K: Eq + std::hash::Hash + Clone,
    F: FnMut(&Event) -> Option<K>,
{
    let mut order: Vec<(K, Group)> = Vec::new();
    let mut index: HashMap<K, usize> = HashMap::new();
    for event in events {
        let Some(key) = key_fn(event) else { continue };
        let slot = match index.get(&key) {
            Some(&i) => i,
            None => {
                index.insert(key.clone(), order.len());
                order.push((key, Group::new(event, now)));
                order.len() - 1
            }
        };
        order[slot].1.absorb(event, now);
    }
    order
}

/// Action for a browsing-domain row; rows that can't be classified are dropped.
fn browse_action(event: &Event) -> Option<ActionType> {
    match event.action_type {
        None => Some(ActionType::View),
        Some(ActionType::Impression) | Some(ActionType::Unknown) => None,
        Some(action) => Some(action),
    }
}

/// Marketplace/retail: group by (category, action), most frequent first.
fn aggregate_browsing(
    events: &[Event],
    domain: Domain,
    cap: usize,
    config: &GraphConfig,
    now: DateTime<Utc>,
) -> Vec<TimelineEvent> {
    let mut groups = group_by(events, now, |e| {
        browse_action(e).map(|a| (e.category_str().map(String::from), a))
    });
    groups.sort_by(|a, b| b.1.count.cmp(&a.1.count));
    groups.truncate(cap);

    groups
        .into_iter()
        .filter_map(|((category, action), g)| {
            let base = config.action_weights.get(action)?;
            Some(TimelineEvent {
                timestamp: g.last_timestamp,
                action,
                domain,
                category,
                item_id: g.item_id,
                brand_id: g.brand_id,
                amount: None,
                weight: g.count as f64 * base,
            })
        })
        .collect()
}

/// Payments: group by brand, largest spend first. The amount enters the
/// weight on a log scale.
fn aggregate_payments(
    events: &[Event],
    config: &GraphConfig,
    now: DateTime<Utc>,
) -> Vec<TimelineEvent> {
    let mut groups = group_by(events, now, |e| {
        Some(e.brand_str().unwrap_or(UNKNOWN_BRAND).to_string())
    });
    groups.sort_by(|a, b| {
        b.1.total_amount
            .partial_cmp(&a.1.total_amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    groups.truncate(config.payments_cap);

    let base = config.action_weights.transaction;
    groups
        .into_iter()
        .map(|(brand, g)| {
            let amount_factor = if g.total_amount > 0.0 {
                g.total_amount.ln_1p()
            } else {
                1.0
            };
            TimelineEvent {
                timestamp: g.last_timestamp,
                action: ActionType::Transaction,
                domain: Domain::Payments,
                category: None,
                item_id: None,
                brand_id: Some(brand),
                amount: Some(g.total_amount),
                weight: g.count as f64 * base * amount_factor,
            }
        })
        .collect()
}

/// Receipts: group by (category, brand), largest spend first.
fn aggregate_receipts(
    events: &[Event],
    config: &GraphConfig,
    now: DateTime<Utc>,
) -> Vec<TimelineEvent> {
    let mut groups = group_by(events, now, |e| {
        Some((
            e.category_str().map(String::from),
            e.brand_str().unwrap_or(UNKNOWN_BRAND).to_string(),
        ))
    });
    groups.sort_by(|a, b| {
        b.1.total_amount
            .partial_cmp(&a.1.total_amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    groups.truncate(config.receipts_cap);

    let base = config.action_weights.purchase;
    groups
        .into_iter()
        .map(|((category, brand), g)| TimelineEvent {
            timestamp: g.last_timestamp,
            action: ActionType::Purchase,
            domain: Domain::Receipts,
            category,
            item_id: g.item_id,
            brand_id: Some(brand),
            amount: Some(g.total_amount),
            weight: g.count as f64 * base,
        })
        .collect()
}

/// Build the behavior graph for one user using the current time for rows
/// without a timestamp.
pub fn build_graph(tables: &EventTables, user_id: &str, config: &GraphConfig) -> BehaviorGraph {
    build_graph_at(tables, user_id, config, Utc::now())
}

/// Build the behavior graph with an explicit "now" (pure function of its inputs).
pub fn build_graph_at(
    tables: &EventTables,
    user_id: &str,
    config: &GraphConfig,
    now: DateTime<Utc>,
) -> BehaviorGraph {
    let mut graph = BehaviorGraph::new(user_id);

    let mut timeline: Vec<TimelineEvent> = Vec::new();
    timeline.extend(aggregate_browsing(
        &tables.marketplace,
        Domain::Marketplace,
        config.marketplace_cap,
        config,
        now,
    ));
    timeline.extend(aggregate_browsing(
        &tables.retail,
        Domain::Retail,
        config.retail_cap,
        config,
        now,
    ));
    timeline.extend(aggregate_payments(&tables.payments, config, now));
    timeline.extend(aggregate_receipts(&tables.receipts, config, now));

    // Stable: equal timestamps keep domain order
    timeline.sort_by_key(|e| e.timestamp);

    let window_secs = config.time_window_hours as f64 * 3600.0;
    let mut node_of: Vec<usize> = Vec::with_capacity(timeline.len());

    for (i, event) in timeline.iter().enumerate() {
        let (key, attrs) = event.node();
        let (idx, created) = graph.upsert_node(key, attrs);
        node_of.push(idx);

        let first = i.saturating_sub(config.predecessor_window);
        for j in first..i {
            let prev = &timeline[j];
            let time_diff = (event.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
            if time_diff > 0.0 && time_diff < window_secs {
                graph.add_or_accumulate_edge(node_of[j], idx, event.weight, time_diff);
            }
        }

        if created && !graph.has_edge_idx(BehaviorGraph::START, idx) {
            graph.add_or_accumulate_edge(BehaviorGraph::START, idx, event.weight, 0.0);
        }
    }

    tracing::debug!(
        user_id,
        groups = timeline.len(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "behavior graph built"
    );

    graph
}
