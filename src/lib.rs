//! yieldfold: DeFi yield harvesting with per-source dedup pipelines and a
//! periodic multi-source merge into append-only snapshots.

pub mod config;
pub mod fetch;
pub mod hash;
pub mod health;
pub mod heartbeat;
pub mod merge;
pub mod migration;
pub mod numeric;
pub mod orchestrator;
pub mod pipeline;
pub mod records;
pub mod retry;
pub mod source;
pub mod sqlite_pragma;
pub mod store;

pub use config::AppConfig;
pub use source::SourceKind;
