pub mod analytics;
pub mod config;
pub mod error;
pub mod events;
pub mod explain;
pub mod graph;
pub mod oracle;
pub mod patterns;
pub mod profile;
pub mod recommender;
pub mod rules;
pub mod scorer;
pub mod taxonomy;
pub mod types;
pub mod util;

pub use config::EngineConfig;
pub use error::NboError;
pub use types::*;
