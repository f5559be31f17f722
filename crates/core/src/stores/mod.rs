pub mod local;
pub mod qdrant;

pub use local::{LocalLineIndex, LocalRegistry};
pub use qdrant::QdrantStore;
