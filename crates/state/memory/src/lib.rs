pub mod store;

pub use store::MemoryStateStore;
