pub mod memory;
pub mod opensearch;
pub mod qdrant;

pub use memory::{MemoryDocumentStore, MemoryVectorIndex};
pub use opensearch::OpenSearchDocumentStore;
pub use qdrant::QdrantStore;

const MAX_ID_LEN: usize = 128;

/// Resume ids are opaque, but anything that could not have been issued by a
/// store (empty, overlong, path-like) is rejected before it reaches a backend.
pub fn is_valid_resume_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
