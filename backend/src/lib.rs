pub mod adjacency;
pub mod assembly;
pub mod config;
pub mod database;
pub mod discovery;
pub mod distance;
pub mod error;
pub mod grid;
pub mod memory_store;
pub mod models;
pub mod seed;
pub mod service;
pub mod store;

pub use adjacency::GridGraph;
pub use config::AppConfig;
pub use database::Database;
pub use discovery::{DiscoveredRoute, DiscoveryEngine};
pub use error::TouringError;
pub use grid::{GridBounds, GridCell};
pub use memory_store::MemoryStore;
pub use service::{ServiceConfig, TouringService};
pub use store::{StoreError, TouringStore};
