//! Agent routing and retrieval caching

mod agent;
mod cache;
mod router;

pub use agent::{open_engine, Agent};
pub use cache::{CacheStats, QueryCache};
pub use router::{decide, AgentFactory, AgentRouter, RouteDecision, SharedModelFactory};
