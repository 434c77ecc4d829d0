use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Behavioral data domain an event was recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Marketplace,
    #[serde(alias = "payment")]
    Payments,
    Retail,
    #[serde(alias = "receipt")]
    Receipts,
    #[serde(alias = "offer")]
    Offers,
    #[serde(other)]
    Unknown,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Marketplace => "marketplace",
            Domain::Payments => "payments",
            Domain::Retail => "retail",
            Domain::Receipts => "receipts",
            Domain::Offers => "offers",
            Domain::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    View,
    Click,
    #[serde(alias = "cart")]
    AddToCart,
    Order,
    Transaction,
    Purchase,
    Impression,
    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::View => "view",
            ActionType::Click => "click",
            ActionType::AddToCart => "add_to_cart",
            ActionType::Order => "order",
            ActionType::Transaction => "transaction",
            ActionType::Purchase => "purchase",
            ActionType::Impression => "impression",
            ActionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized interaction event. Optional columns may be absent
/// in any domain; ids arrive as strings or numbers depending on the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub domain: Domain,
    #[serde(default)]
    pub action_type: Option<ActionType>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub item_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub brand_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(user_id: &str, domain: Domain) -> Self {
        Self {
            user_id: user_id.to_string(),
            domain,
            action_type: None,
            item_id: None,
            category: None,
            brand_id: None,
            amount: None,
            timestamp: None,
        }
    }

    pub fn action(mut self, action: ActionType) -> Self {
        self.action_type = Some(action);
        self
    }

    pub fn item(mut self, item_id: &str) -> Self {
        self.item_id = Some(item_id.to_string());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn brand(mut self, brand_id: &str) -> Self {
        self.brand_id = Some(brand_id.to_string());
        self
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Timestamp, or `now` when the row had none
    pub fn timestamp_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp.unwrap_or(now)
    }

    /// Category with blank values treated as missing
    pub fn category_str(&self) -> Option<&str> {
        non_blank(self.category.as_deref())
    }

    pub fn item_str(&self) -> Option<&str> {
        non_blank(self.item_id.as_deref())
    }

    pub fn brand_str(&self) -> Option<&str> {
        non_blank(self.brand_id.as_deref())
    }

    /// Absolute amount; negative values are refunds and count by magnitude.
    pub fn abs_amount(&self) -> f64 {
        match self.amount {
            Some(a) if a.is_finite() => a.abs(),
            _ => 0.0,
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Per-domain event tables for one user. Any table may be empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventTables {
    pub marketplace: Vec<Event>,
    pub payments: Vec<Event>,
    pub retail: Vec<Event>,
    pub receipts: Vec<Event>,
    pub offers: Vec<Event>,
    /// Rows whose domain was not recognized; only the pattern sequence sees them
    pub other: Vec<Event>,
}

impl EventTables {
    /// Route events into their domain tables
    pub fn from_events<I: IntoIterator<Item = Event>>(events: I) -> Self {
        let mut tables = EventTables::default();
        for event in events {
            tables.push(event);
        }
        tables
    }

    pub fn push(&mut self, event: Event) {
        match event.domain {
            Domain::Marketplace => self.marketplace.push(event),
            Domain::Payments => self.payments.push(event),
            Domain::Retail => self.retail.push(event),
            Domain::Receipts => self.receipts.push(event),
            Domain::Offers => self.offers.push(event),
            Domain::Unknown => self.other.push(event),
        }
    }

    /// Iterate over every table's events (no ordering guarantee across domains)
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.marketplace
            .iter()
            .chain(self.payments.iter())
            .chain(self.retail.iter())
            .chain(self.receipts.iter())
            .chain(self.offers.iter())
            .chain(self.other.iter())
    }

    pub fn len(&self) -> usize {
        self.marketplace.len()
            + self.payments.len()
            + self.retail.len()
            + self.receipts.len()
            + self.offers.len()
            + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed product catalog. Declaration order is the tie-break order for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Product {
    Mortgage,
    CreditCard,
    Deposit,
    ConsumerLoan,
    DebitCard,
}

impl Product {
    pub const ALL: [Product; 5] = [
        Product::Mortgage,
        Product::CreditCard,
        Product::Deposit,
        Product::ConsumerLoan,
        Product::DebitCard,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn name(&self) -> &'static str {
        match self {
            Product::Mortgage => "Mortgage",
            Product::CreditCard => "Credit Card",
            Product::Deposit => "Deposit",
            Product::ConsumerLoan => "Consumer Loan",
            Product::DebitCard => "Debit Card",
        }
    }

    /// Position in the catalog
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Product {
    type Err = String;

    /// Accepts catalog names, slugs and the Russian product names the
    /// generative oracle tends to answer with.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let product = match lower.as_str() {
            "mortgage" | "ипотека" => Product::Mortgage,
            "credit card" | "credit_card" | "кредитная карта" | "кредитка" => Product::CreditCard,
            "deposit" | "вклад" => Product::Deposit,
            "consumer loan" | "consumer_loan" | "loan" | "кредит" => Product::ConsumerLoan,
            "debit card" | "debit_card" | "дебетовая карта" | "дебет" => Product::DebitCard,
            _ => return Err(format!("unknown product: {}", s)),
        };
        Ok(product)
    }
}

/// One ranked recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationScore {
    pub product: String,
    pub score: f64,
}

/// Flat per-request statistics summarizing a user's events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Marketplace events seen
    pub num_views: usize,
    pub unique_items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_category: Option<String>,
    /// Most frequent receipt category (brand-category purchases)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_brand_category: Option<String>,
    pub num_payments: usize,
    pub avg_tx: f64,
    pub total_tx: f64,
    pub max_tx: f64,
    pub min_tx: f64,
    /// Most frequent payment brand, never the `unknown` class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_brand: Option<String>,
    pub days_active: i64,
    pub events_per_day: f64,
    pub num_patterns: usize,
    /// Most frequent mined pattern, e.g. `V→P→V`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

/// RFC 3339 strings or epoch seconds; anything else becomes `None` and
/// is later treated as "now".
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s.parse::<DateTime<Utc>>().ok(),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    })
}
