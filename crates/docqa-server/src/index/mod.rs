pub mod bm25;
pub mod milvus;
pub mod vector_store;

pub use bm25::{Bm25Hit, Bm25Index};
pub use vector_store::{
    ChunkMetadata, MemoryVectorStore, SearchFilter, VectorHit, VectorRecord, VectorStore,
};
