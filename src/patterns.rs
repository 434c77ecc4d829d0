// Pattern miner: encode a user's events as a single-character sequence, then
// count every contiguous n-gram of length min_len..=max_len and keep those
// seen at least min_support times.

use crate::config::PatternConfig;
use crate::types::{ActionType, Domain, Event, EventTables};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Longest n-gram ever mined
pub const MAX_PATTERN_LEN: usize = 5;
/// Separator used when rendering patterns for people
pub const PATTERN_ARROW: &str = "→";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternCode {
    #[serde(rename = "V")]
    View,
    #[serde(rename = "P")]
    Payment,
    #[serde(rename = "C")]
    Click,
    #[serde(rename = "A")]
    AddToCart,
    #[serde(rename = "O")]
    Order,
    #[serde(rename = "R")]
    Receipt,
    #[serde(rename = "I")]
    Impression,
    #[serde(rename = "?")]
    Unknown,
}

impl PatternCode {
    pub fn as_char(&self) -> char {
        match self {
            PatternCode::View => 'V',
            PatternCode::Payment => 'P',
            PatternCode::Click => 'C',
            PatternCode::AddToCart => 'A',
            PatternCode::Order => 'O',
            PatternCode::Receipt => 'R',
            PatternCode::Impression => 'I',
            PatternCode::Unknown => '?',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        let code = match c.to_ascii_uppercase() {
            'V' => PatternCode::View,
            'P' => PatternCode::Payment,
            'C' => PatternCode::Click,
            'A' => PatternCode::AddToCart,
            'O' => PatternCode::Order,
            'R' => PatternCode::Receipt,
            'I' => PatternCode::Impression,
            '?' => PatternCode::Unknown,
            _ => return None,
        };
        Some(code)
    }

    /// Code for one event. Browsing rows without a usable action read as views.
    pub fn for_event(event: &Event) -> Self {
        match event.domain {
            Domain::Marketplace | Domain::Retail => match event.action_type {
                Some(ActionType::Click) => PatternCode::Click,
                Some(ActionType::AddToCart) => PatternCode::AddToCart,
                Some(ActionType::Order) => PatternCode::Order,
                _ => PatternCode::View,
            },
            Domain::Payments => PatternCode::Payment,
            Domain::Receipts => PatternCode::Receipt,
            Domain::Offers => match event.action_type {
                Some(ActionType::Click) => PatternCode::Click,
                Some(ActionType::Impression) => PatternCode::Impression,
                _ => PatternCode::View,
            },
            Domain::Unknown => PatternCode::Unknown,
        }
    }
}

impl fmt::Display for PatternCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Time-ordered codes for all of a user's events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSequence(pub Vec<PatternCode>);

impl PatternSequence {
    /// Parse a compact code string such as `"VVPC"`; unknown characters become `?`.
    pub fn parse(codes: &str) -> Self {
        Self(
            codes
                .chars()
                .map(|c| PatternCode::from_char(c).unwrap_or(PatternCode::Unknown))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn codes(&self) -> &[PatternCode] {
        &self.0
    }
}

impl fmt::Display for PatternSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in &self.0 {
            write!(f, "{}", code)?;
        }
        Ok(())
    }
}

/// A contiguous n-gram and how often it occurred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequentPattern {
    pub codes: Vec<PatternCode>,
    pub count: usize,
}

impl FrequentPattern {
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Compact form without separators, e.g. `VPV`
    pub fn compact(&self) -> String {
        self.codes.iter().map(PatternCode::as_char).collect()
    }

    pub fn count_of(&self, code: PatternCode) -> usize {
        self.codes.iter().filter(|&&c| c == code).count()
    }

    pub fn contains(&self, compact: &str) -> bool {
        self.compact().contains(compact)
    }
}

impl fmt::Display for FrequentPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pattern_to_string(&self.codes))
    }
}

/// `[V, P, V]` -> `V→P→V`
pub fn pattern_to_string(codes: &[PatternCode]) -> String {
    codes
        .iter()
        .map(|c| c.as_char().to_string())
        .collect::<Vec<_>>()
        .join(PATTERN_ARROW)
}

/// Encode all events in timestamp order (missing timestamps read as now).
pub fn extract_sequence(tables: &EventTables) -> PatternSequence {
    extract_sequence_at(tables, Utc::now())
}

pub fn extract_sequence_at(tables: &EventTables, now: DateTime<Utc>) -> PatternSequence {
    let mut events: Vec<&Event> = tables.iter().collect();
    // Stable sort keeps table order for identical timestamps
    events.sort_by_key(|e| e.timestamp_or(now));
    PatternSequence(events.into_iter().map(PatternCode::for_event).collect())
}

/// Mine n-grams of length `min_len..=5` with at least `min_support` occurrences,
/// most frequent first, ties in first-seen order.
pub fn mine_patterns(
    sequence: &PatternSequence,
    min_len: usize,
    min_support: usize,
) -> Vec<FrequentPattern> {
    mine_patterns_bounded(sequence, min_len, MAX_PATTERN_LEN, min_support)
}

pub fn mine_patterns_bounded(
    sequence: &PatternSequence,
    min_len: usize,
    max_len: usize,
    min_support: usize,
) -> Vec<FrequentPattern> {
    let codes = sequence.codes();
    let min_len = min_len.max(1);
    let max_len = max_len.min(MAX_PATTERN_LEN).min(codes.len());
    if min_len > max_len {
        return Vec::new();
    }

    let mut counted: Vec<(&[PatternCode], usize)> = Vec::new();
    let mut index: HashMap<&[PatternCode], usize> = HashMap::new();
    for len in min_len..=max_len {
        for window in codes.windows(len) {
            match index.get(window) {
                Some(&i) => counted[i].1 += 1,
                None => {
                    index.insert(window, counted.len());
                    counted.push((window, 1));
                }
            }
        }
    }

    let mut frequent: Vec<FrequentPattern> = counted
        .into_iter()
        .filter(|(_, count)| *count >= min_support)
        .map(|(codes, count)| FrequentPattern {
            codes: codes.to_vec(),
            count,
        })
        .collect();
    frequent.sort_by(|a, b| b.count.cmp(&a.count));
    frequent
}

/// Sequence + mining with configured bounds
pub fn extract_patterns(tables: &EventTables, config: &PatternConfig) -> Vec<FrequentPattern> {
    let sequence = extract_sequence(tables);
    let patterns = mine_patterns_bounded(
        &sequence,
        config.min_len,
        config.max_len,
        config.min_support,
    );
    tracing::debug!(
        sequence_len = sequence.len(),
        patterns = patterns.len(),
        "patterns mined"
    );
    patterns
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStatistics {
    pub total: usize,
    pub avg_len: f64,
    pub min_len: usize,
    pub max_len: usize,
    /// Up to five patterns with their occurrence counts
    pub most_common: Vec<(String, usize)>,
}

pub fn pattern_statistics(patterns: &[FrequentPattern]) -> PatternStatistics {
    if patterns.is_empty() {
        return PatternStatistics::default();
    }
    let lengths: Vec<usize> = patterns.iter().map(FrequentPattern::len).collect();
    let mut ranked: Vec<&FrequentPattern> = patterns.iter().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));

    PatternStatistics {
        total: patterns.len(),
        avg_len: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
        min_len: lengths.iter().copied().min().unwrap_or(0),
        max_len: lengths.iter().copied().max().unwrap_or(0),
        most_common: ranked
            .into_iter()
            .take(5)
            .map(|p| (p.to_string(), p.count))
            .collect(),
    }
}
