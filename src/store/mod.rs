pub mod graph;
pub mod models;
pub mod relational;

pub use graph::GraphStore;
pub use relational::{RelationalStore, StoreError};
