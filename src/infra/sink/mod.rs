//! Storage collaborators and the log store layer.

pub mod memory;
pub mod store_layer;

pub use memory::InMemorySink;
pub use store_layer::{LogRecord, StoreLayer};
