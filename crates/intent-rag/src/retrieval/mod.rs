//! Knowledge-base storage and retrieval

mod engine;
mod vector_index;

pub use engine::{rerank_order, RankedChunk, RetrievalEngine};
pub use vector_index::{squared_l2, IndexHit, VectorIndex};
