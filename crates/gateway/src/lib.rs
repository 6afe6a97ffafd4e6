pub mod access_log;
pub mod balancer;
pub mod builder;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod links;
pub mod metrics;
pub mod range;
pub mod registry;
pub mod stream;

pub use access_log::AccessLog;
pub use balancer::{BackendPool, SessionSlot, WorkloadTable, select_backend};
pub use builder::{
    DEFAULT_CHUNK_SIZE, DEFAULT_LINK_TTL_SECONDS, DEFAULT_NAMESPACE, GatewayBuilder,
};
pub use error::GatewayError;
pub use gateway::{Gateway, IssuedLink, RequestPhase, StreamRequest, StreamResponse};
pub use limiter::{RateLimiter, RateLimits};
pub use links::LinkLedger;
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use range::{ByteRange, ChunkPlan, RangeSpec, parse_range_header, resolve_range};
pub use registry::{FileRegistry, Ingested};
pub use stream::{ByteStream, chunk_stream};
