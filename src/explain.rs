// Explanation generator boundary.
//
// Free-text explanations come from an external oracle when one is configured.
// Answers are cached by SHA-256 of (profile, product); without an oracle, or
// when it fails, a template is picked deterministically from the same key.

use crate::error::NboError;
use crate::types::{Product, UserProfile};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

const EXPLAIN_PROMPT: &str = include_str!("../prompts/explain.txt");
const GRAPH_PROMPT: &str = include_str!("../prompts/graph.txt");

pub trait ExplanationOracle: Send + Sync {
    fn explain(&self, prompt: &str) -> Result<String, NboError>;
}

fn templates(product: Product) -> &'static [&'static str] {
    match product {
        Product::Mortgage => &[
            "A mortgage fits you: your browsing shows sustained interest in property and renovation.",
            "Your behavior suggests a large planned purchase; a mortgage can help you buy a home.",
            "Your purchase pattern points to real estate, which is what a mortgage is for.",
        ],
        Product::CreditCard => &[
            "A credit card suits you because you make purchases often.",
            "Your spending profile is a good match for a credit card with a grace period.",
            "Given how actively you pay, a credit card will make your payments easier.",
        ],
        Product::Deposit => &[
            "A deposit helps you set aside and grow your funds.",
            "Your financial behavior suggests you can save; a deposit keeps and grows those savings.",
        ],
        Product::ConsumerLoan => &[
            "A consumer loan fits your current financial goals.",
            "Based on your profile, a loan can help you carry out your plans sooner.",
        ],
        Product::DebitCard => &[
            "A debit card covers your everyday spending with no borrowing.",
            "Your regular payments fit a debit card with cashback on daily purchases.",
        ],
    }
}

/// Cache key: hex SHA-256 over the profile JSON and the product name
pub fn cache_key(profile: &UserProfile, product: Product) -> String {
    let profile_json = serde_json::to_string(profile).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(profile_json.as_bytes());
    hasher.update(b"\0");
    hasher.update(product.name().as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic template for a key
pub fn template_explanation(product: Product, key: &str) -> String {
    let options = templates(product);
    let index = u64::from_str_radix(&key[..key.len().min(8)], 16).unwrap_or(0) as usize;
    options[index % options.len()].to_string()
}

pub fn build_explain_prompt(profile: &UserProfile, product: Product) -> String {
    EXPLAIN_PROMPT
        .replace("{avg_tx}", &format!("{:.2}", profile.avg_tx))
        .replace("{num_views}", &profile.num_views.to_string())
        .replace("{num_payments}", &profile.num_payments.to_string())
        .replace(
            "{top_category}",
            profile.top_category.as_deref().unwrap_or("unknown"),
        )
        .replace("{pattern}", profile.pattern.as_deref().unwrap_or("unknown"))
        .replace("{product}", product.name())
}

pub fn build_graph_prompt(user_id: &str, graph_summary: &str) -> String {
    GRAPH_PROMPT
        .replace("{user_id}", user_id)
        .replace("{graph}", graph_summary)
}

#[derive(Default)]
pub struct Explainer {
    oracle: Option<Box<dyn ExplanationOracle>>,
    cache: DashMap<String, String>,
}

impl Explainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oracle(mut self, oracle: Box<dyn ExplanationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Explanation text for one product; never fails. Oracle answers are
    /// cached, template answers are recomputed.
    pub fn explain(&self, profile: &UserProfile, product: Product) -> String {
        let key = cache_key(profile, product);
        if let Some(hit) = self.cache.get(&key) {
            return hit.value().clone();
        }

        if let Some(oracle) = &self.oracle {
            match oracle.explain(&build_explain_prompt(profile, product)) {
                Ok(text) if !text.trim().is_empty() => {
                    let text = text.trim().to_string();
                    self.cache.insert(key, text.clone());
                    return text;
                }
                Ok(_) => tracing::warn!(product = %product, "empty explanation from oracle"),
                Err(e) => tracing::warn!(product = %product, error = %e, "explanation oracle failed"),
            }
        }

        template_explanation(product, &key)
    }

    /// Oracle reading of a graph summary. `None` without an oracle or when it
    /// fails; there is no template for this.
    pub fn analyze_graph(&self, user_id: &str, graph_summary: &str) -> Option<String> {
        let oracle = self.oracle.as_ref()?;
        match oracle.explain(&build_graph_prompt(user_id, graph_summary)) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                tracing::warn!(user_id, "empty graph analysis from oracle");
                None
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "graph analysis oracle failed");
                None
            }
        }
    }
}
