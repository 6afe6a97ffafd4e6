pub mod error;
pub mod http;
pub mod memory;
pub mod source;

pub use error::SourceError;
pub use http::HttpChunkSource;
pub use memory::MemoryChunkSource;
pub use source::{ChunkSource, FileProperties};
