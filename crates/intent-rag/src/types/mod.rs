//! Core types for the engine

pub mod chunk;
pub mod intent;
pub mod query;
pub mod response;

pub use chunk::{Chunk, ChunkRecord, LabeledExample};
pub use intent::Intent;
pub use query::{IntentQueryRequest, QueryRequest, SimpleQueryParams};
pub use response::{
    ErrorChunk, HealthResponse, IntentFrame, IntentOption, IntentResponse, StreamChunk,
};
