// User profile summarizer: flat scalar statistics over one user's events.

use crate::graph::UNKNOWN_BRAND;
use crate::patterns::FrequentPattern;
use crate::types::{EventTables, UserProfile};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Patterns exposed to the regressor as binary features, in feature order
pub const FLAG_PATTERNS: [&str; 4] = ["V→P→V", "V→V→P", "P→V→C", "V→P→P"];

/// Length of `UserProfile::feature_vector`
pub const FEATURE_COUNT: usize = 8 + FLAG_PATTERNS.len();

/// Most frequent value; ties go to the value seen first.
fn mode<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (order, v) in values.into_iter().enumerate() {
        counts.entry(v).or_insert((0, order)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
        .map(|(v, _)| v.to_string())
}

/// Build the profile. Patterns are expected most frequent first.
pub fn build_profile(tables: &EventTables, patterns: &[FrequentPattern], user_id: &str) -> UserProfile {
    build_profile_at(tables, patterns, user_id, Utc::now())
}

/// `build_profile` with an explicit clock; events without a timestamp
/// count as happening at `now`.
pub fn build_profile_at(
    tables: &EventTables,
    patterns: &[FrequentPattern],
    user_id: &str,
    now: DateTime<Utc>,
) -> UserProfile {
    let mut profile = UserProfile {
        user_id: user_id.to_string(),
        ..UserProfile::default()
    };

    let market = &tables.marketplace;
    profile.num_views = market.len();
    profile.unique_items = market
        .iter()
        .filter_map(|e| e.item_str())
        .collect::<HashSet<_>>()
        .len();
    profile.top_category = mode(market.iter().filter_map(|e| e.category_str()));

    let payments = &tables.payments;
    profile.num_payments = payments.len();
    if !payments.is_empty() {
        let amounts: Vec<f64> = payments.iter().map(|e| e.abs_amount()).collect();
        profile.total_tx = amounts.iter().sum();
        profile.avg_tx = profile.total_tx / amounts.len() as f64;
        profile.max_tx = amounts.iter().copied().fold(0.0, f64::max);
        profile.min_tx = amounts.iter().copied().fold(f64::INFINITY, f64::min);
    }
    profile.top_brand = mode(
        payments
            .iter()
            .filter_map(|e| e.brand_str())
            .filter(|b| *b != UNKNOWN_BRAND),
    );
    profile.top_brand_category = mode(tables.receipts.iter().filter_map(|e| e.category_str()));

    let timestamps: Vec<_> = tables.iter().map(|e| e.timestamp.unwrap_or(now)).collect();
    if let (Some(first), Some(last)) = (timestamps.iter().min(), timestamps.iter().max()) {
        profile.days_active = ((*last - *first).num_days() + 1).max(1);
        profile.events_per_day = timestamps.len() as f64 / profile.days_active as f64;
    }

    profile.num_patterns = patterns.len();
    profile.patterns = patterns.iter().map(|p| p.to_string()).collect();
    profile.pattern = profile.patterns.first().cloned();

    profile
}

impl UserProfile {
    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.patterns.iter().any(|p| p == pattern)
    }

    /// Fixed-order numeric features for a trained regressor:
    /// eight scalars followed by one binary flag per `FLAG_PATTERNS` entry.
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut features = vec![
            self.num_views as f64,
            self.num_payments as f64,
            self.avg_tx,
            self.total_tx,
            self.days_active as f64,
            self.events_per_day,
            self.unique_items as f64,
            self.num_patterns as f64,
        ];
        features.extend(
            FLAG_PATTERNS
                .iter()
                .map(|p| if self.has_pattern(p) { 1.0 } else { 0.0 }),
        );
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{mine_patterns, PatternSequence};
    use crate::types::{Domain, Event};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn empty_profile() {
        let p = build_profile(&EventTables::default(), &[], "u1");
        assert_eq!(p.user_id, "u1");
        assert_eq!(p.num_views, 0);
        assert_eq!(p.days_active, 0);
        assert_eq!(p.events_per_day, 0.0);
        assert!(p.top_category.is_none());
        assert!(p.pattern.is_none());
        assert_eq!(p.feature_vector(), vec![0.0; FEATURE_COUNT]);
    }

    #[test]
    fn payments_use_absolute_amounts() {
        let tables = EventTables::from_events(vec![
            Event::new("u", Domain::Payments).brand("b1").amount(-100.0),
            Event::new("u", Domain::Payments).brand("b1").amount(300.0),
            Event::new("u", Domain::Payments).brand(UNKNOWN_BRAND).amount(200.0),
            Event::new("u", Domain::Payments).brand(UNKNOWN_BRAND).amount(200.0),
            Event::new("u", Domain::Payments).brand(UNKNOWN_BRAND).amount(200.0),
        ]);
        let p = build_profile(&tables, &[], "u");
        assert_eq!(p.num_payments, 5);
        assert_eq!(p.total_tx, 1000.0);
        assert_eq!(p.avg_tx, 200.0);
        assert_eq!(p.max_tx, 300.0);
        assert_eq!(p.min_tx, 100.0);
        assert_eq!(p.top_brand.as_deref(), Some("b1"));
    }

    #[test]
    fn mode_tie_goes_to_first_seen() {
        assert_eq!(mode(["b", "a", "a", "b"]).as_deref(), Some("b"));
        assert_eq!(mode(std::iter::empty()), None);
    }

    #[test]
    fn activity_span() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let tables = EventTables::from_events(vec![
            Event::new("u", Domain::Marketplace).item("i1").at(t),
            Event::new("u", Domain::Marketplace).item("i1").at(t + Duration::hours(30)),
            Event::new("u", Domain::Receipts).category("food").at(t + Duration::days(3)),
            Event::new("u", Domain::Receipts).category("food"),
        ]);
        let p = build_profile_at(&tables, &[], "u", t + Duration::days(3));
        assert_eq!(p.days_active, 4);
        assert_eq!(p.events_per_day, 1.0);
        assert_eq!(p.unique_items, 1);
        assert_eq!(p.top_brand_category.as_deref(), Some("food"));
    }

    #[test]
    fn untimed_events_still_count_as_activity() {
        let tables = EventTables::from_events(
            (0..4).map(|_| Event::new("u", Domain::Payments).brand("b1").amount(50.0)),
        );
        let p = build_profile(&tables, &[], "u");
        assert_eq!(p.days_active, 1);
        assert_eq!(p.events_per_day, 4.0);
        assert_eq!(p.feature_vector()[4], 1.0);
        assert_eq!(p.feature_vector()[5], 4.0);
    }

    #[test]
    fn every_event_counts_per_day() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut events: Vec<Event> = (0..3)
            .map(|_| Event::new("u", Domain::Marketplace).item("i1"))
            .collect();
        events.push(Event::new("u", Domain::Payments).amount(10.0).at(t));
        events.push(Event::new("u", Domain::Payments).amount(10.0).at(t + Duration::hours(2)));
        let p = build_profile_at(&EventTables::from_events(events), &[], "u", t + Duration::hours(1));
        assert_eq!(p.days_active, 1);
        assert_eq!(p.events_per_day, 5.0);
    }

    #[test]
    fn pattern_flags() {
        let patterns = mine_patterns(&PatternSequence::parse("VPVPV"), 3, 1);
        let p = build_profile(&EventTables::default(), &patterns, "u");
        assert_eq!(p.pattern.as_deref(), Some("V→P→V"));
        let f = p.feature_vector();
        assert_eq!(f.len(), FEATURE_COUNT);
        assert_eq!(f[8], 1.0);
        assert_eq!(f[9], 0.0);
    }
}
