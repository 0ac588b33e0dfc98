//! Persistence for both storage tiers
//!
//! - **Store A** ([`collector::SqliteCollectorStore`]): servers and raw
//!   performance records written by the ingestion pipeline
//! - **Store B** ([`portal::SqlitePortalStore`]): the portal's copy, plus
//!   alerts and subscriptions
//!
//! Servers are correlated across stores by `ip_address`, never by id.

pub mod backend;
pub mod collector;
pub mod error;
pub mod portal;
pub mod schema;
pub mod sqlite;

pub use backend::{CollectorStore, HealthStatus, PortalStore, QueryRange};
pub use error::{StorageError, StorageResult};
pub use schema::{AlertRecord, PerformanceRecord, ServerRecord, ServerStatus, Subscription};
