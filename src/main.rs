use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nbo_engine::{
    analytics, events, explain::Explainer, graph, oracle::CommandOracle, patterns, profile,
    recommender::{Recommender, UserReport},
    rules::{RuleCache, RuleEngine},
    util, EngineConfig, EventTables,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nbo-engine")]
#[command(about = "Next-best-offer recommendations from behavior graphs and event patterns")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for one user
    Recommend {
        /// JSON Lines file of normalized events
        #[arg(short, long)]
        events: PathBuf,
        #[arg(short, long)]
        user: String,
        /// Number of products to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recommend for every user in the file (parallel)
    Batch {
        #[arg(short, long)]
        events: PathBuf,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Show the behavior graph of one user
    Graph {
        #[arg(short, long)]
        events: PathBuf,
        #[arg(short, long)]
        user: String,
    },

    /// Show the event sequence and mined patterns of one user
    Patterns {
        #[arg(short, long)]
        events: PathBuf,
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        min_len: Option<usize>,
        #[arg(long)]
        min_support: Option<usize>,
    },

    /// Print the profile of one user as JSON
    Profile {
        #[arg(short, long)]
        events: PathBuf,
        #[arg(short, long)]
        user: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    init_tracing(&config.logging.level);

    match cli.command {
        Command::Recommend {
            events,
            user,
            top_k,
            json,
        } => {
            if let Some(k) = top_k {
                config.scoring.top_k = k;
            }
            cmd_recommend(config, &events, &user, json)
        }
        Command::Batch { events, top_k } => {
            if let Some(k) = top_k {
                config.scoring.top_k = k;
            }
            cmd_batch(config, &events)
        }
        Command::Graph { events, user } => cmd_graph(&config, &events, &user),
        Command::Patterns {
            events,
            user,
            min_len,
            min_support,
        } => {
            if let Some(n) = min_len {
                config.patterns.min_len = n;
                config.patterns.max_len = config.patterns.max_len.max(n);
            }
            if let Some(n) = min_support {
                config.patterns.min_support = n;
            }
            cmd_patterns(&config, &events, &user)
        }
        Command::Profile { events, user } => cmd_profile(&config, &events, &user),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_users(path: &Path) -> Result<BTreeMap<String, EventTables>> {
    let events = events::read_events_jsonl(path)
        .with_context(|| format!("reading events from {}", path.display()))?;
    Ok(events::group_by_user(events))
}

fn load_user(path: &Path, user: &str) -> Result<EventTables> {
    let mut users = load_users(path)?;
    match users.remove(user) {
        Some(tables) => Ok(tables),
        None => {
            tracing::warn!(user, "no events for user, continuing with an empty history");
            Ok(EventTables::default())
        }
    }
}

fn build_recommender(config: EngineConfig) -> Result<Recommender> {
    let cache_path = config.rules.resolved_cache_path();
    let cache = RuleCache::load(&cache_path)
        .with_context(|| format!("loading rule cache {}", cache_path.display()))?;

    let mut rules = RuleEngine::new(cache);
    let mut explainer = Explainer::new();
    if let Some(oracle) = CommandOracle::from_config(&config.oracle) {
        tracing::info!(command = ?config.oracle.command, "using command oracle");
        rules = rules.with_oracle(Box::new(oracle.clone()));
        explainer = explainer.with_oracle(Box::new(oracle));
    }

    Ok(Recommender::new(config)
        .with_rules(rules)
        .with_explainer(explainer))
}

fn save_rule_cache(recommender: &Recommender) -> Result<()> {
    let cache = recommender.rules().cache();
    if cache.is_dirty() {
        let path = recommender.config().rules.resolved_cache_path();
        cache
            .save(&path)
            .with_context(|| format!("saving rule cache {}", path.display()))?;
        eprintln!("Saved {} cached rules to {}", cache.len(), path.display());
    }
    Ok(())
}

fn print_report(report: &UserReport) {
    println!("=== {} ===", report.user_id);
    println!(
        "Graph: {} nodes, {} edges, density {:.3}",
        report.graph_stats.nodes, report.graph_stats.edges, report.graph_stats.density
    );
    if let Some(analysis) = &report.graph_analysis {
        println!("Graph analysis: {}", util::truncate(analysis, 200));
    }
    for rule in &report.graph_rules {
        println!("Graph rule: {} ({}) {}", rule.product, rule.confidence, rule.reason);
    }
    if let Some(top) = report.patterns.first() {
        println!("Patterns: {} (top {})", report.patterns.len(), top);
    } else {
        println!("Patterns: none");
    }
    for (i, rec) in report.recommendations.iter().enumerate() {
        println!(
            "  {}. {:<14} {:.3} [{:?}]",
            i + 1,
            rec.product,
            rec.score,
            rec.source
        );
        if !rec.reason.is_empty() {
            println!("     {}", util::truncate(&rec.reason, 120));
        }
    }
    println!();
}

fn cmd_recommend(config: EngineConfig, events: &Path, user: &str, json: bool) -> Result<()> {
    let tables = load_user(events, user)?;
    let recommender = build_recommender(config)?;
    let report = recommender.process_user(user, &tables);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    save_rule_cache(&recommender)
}

fn cmd_batch(config: EngineConfig, events: &Path) -> Result<()> {
    let users = load_users(events)?;
    eprintln!("Processing {} users...", users.len());

    let recommender = build_recommender(config)?;
    let reports = recommender.process_users(&users);
    for report in &reports {
        print_report(report);
    }

    save_rule_cache(&recommender)
}

fn cmd_graph(config: &EngineConfig, events: &Path, user: &str) -> Result<()> {
    let tables = load_user(events, user)?;
    let graph = graph::build_graph(&tables, user, &config.graph);
    let stats = analytics::graph_stats(&graph);
    let importance = analytics::graph_importance(&graph, &config.analytics);

    println!("=== Graph: {} ===", user);
    println!("Nodes: {}", stats.nodes);
    println!("Edges: {}", stats.edges);
    println!("Density: {:.4}", stats.density);
    println!("Avg degree: {:.2}", stats.avg_degree);
    println!("Connected: {}", stats.is_connected);

    let mut kinds: Vec<_> = analytics::kind_counts(&graph).into_iter().collect();
    kinds.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.as_str().cmp(b.0.as_str())));
    let kinds: Vec<String> = kinds
        .iter()
        .map(|(k, n)| format!("{}={}", k.as_str(), n))
        .collect();
    println!("Node kinds: {}", kinds.join(", "));
    println!();

    println!("Top nodes by importance:");
    for (key, score) in analytics::top_nodes(&importance, 10) {
        println!("  {:.4}  {}", score, util::truncate(&key.to_string(), 80));
    }
    println!();

    println!("Summary: {}", analytics::describe_graph(&graph, 5));
    for path in analytics::path_patterns(&graph, config.analytics.path_cutoff) {
        println!("  {}", path);
    }

    Ok(())
}

fn cmd_patterns(config: &EngineConfig, events: &Path, user: &str) -> Result<()> {
    config.validate().context("invalid pattern settings")?;
    let tables = load_user(events, user)?;
    let sequence = patterns::extract_sequence(&tables);
    let mined = patterns::extract_patterns(&tables, &config.patterns);
    let stats = patterns::pattern_statistics(&mined);

    println!("=== Patterns: {} ===", user);
    println!("Sequence ({}): {}", sequence.len(), util::truncate(&sequence.to_string(), 200));
    println!(
        "Found {} patterns (len {}..={}, support >= {})",
        stats.total, config.patterns.min_len, config.patterns.max_len, config.patterns.min_support
    );
    for p in mined.iter().take(config.patterns.top_patterns) {
        println!("  {:>4}x  {}", p.count, p);
    }
    if stats.total > 0 {
        println!("Avg length: {:.2}", stats.avg_len);
    }

    Ok(())
}

fn cmd_profile(config: &EngineConfig, events: &Path, user: &str) -> Result<()> {
    let tables = load_user(events, user)?;
    let mined = patterns::extract_patterns(&tables, &config.patterns);
    let profile = profile::build_profile(&tables, &mined, user);
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}
