use std::sync::Arc;

use tracing::instrument;

use crate::store::{GraphStore, RelationalStore, StoreError};

/// Owns the durable and in-process stores. Connects and runs migrations
/// once at startup; every other component receives clones of the `Arc`s
/// handed out here rather than opening their own connections.
pub struct StoreHandler {
    pub relational: Arc<RelationalStore>,
    pub graph: Arc<GraphStore>,
}

impl StoreHandler {
    #[instrument(skip(database_url))]
    pub async fn init(database_url: &str) -> Result<Self, StoreError> {
        let relational = RelationalStore::connect(database_url).await?;
        relational.migrate().await?;
        Ok(Self {
            relational: Arc::new(relational),
            graph: Arc::new(GraphStore::new()),
        })
    }
}
