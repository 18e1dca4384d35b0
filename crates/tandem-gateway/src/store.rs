use std::sync::Arc;

use tandem_db::{Database, Result as StoreResult};

use crate::error::GatewayError;

/// Run blocking rusqlite work off the async runtime.
pub(crate) async fn with_store<T, F>(db: &Arc<Database>, f: F) -> Result<T, GatewayError>
where
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| GatewayError::Internal(format!("store task join: {e}")))?
        .map_err(GatewayError::from)
}
