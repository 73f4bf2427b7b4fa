use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::data_connect::live_queries::{QueryKey, QuerySpec};
use crate::data_connect::query_executor::{
    QueryExecutor, QueryExecutorResult, QueryExecutorUpdates,
};
use crate::data_connect::sequenced::SequencedReference;
use crate::data_connect::transport::DataConnectTransport;

/// A query shared by every caller currently interested in the same key.
///
/// Instances are handed out by [`crate::data_connect::live_queries::LiveQueries`], which
/// closes them once the last user lets go.
pub struct LiveQuery {
    executor: QueryExecutor,
    closed: AtomicBool,
}

impl LiveQuery {
    pub fn new(
        spec: QuerySpec,
        transport: Arc<dyn DataConnectTransport>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            executor: QueryExecutor::new(spec, transport, cancellation),
            closed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &QueryKey {
        self.executor.key()
    }

    pub fn spec(&self) -> &QuerySpec {
        self.executor.spec()
    }

    pub async fn execute(&self) -> SequencedReference<QueryExecutorResult> {
        self.executor.execute().await
    }

    pub fn subscribe(&self, execute_query: bool) -> QueryExecutorUpdates {
        self.executor.subscribe(execute_query)
    }

    pub fn last_result(&self) -> Option<SequencedReference<QueryExecutorResult>> {
        self.executor.last_result()
    }

    pub fn last_successful_result(&self) -> Option<SequencedReference<QueryExecutorResult>> {
        self.executor.last_successful_result()
    }

    /// Closes the executor. Returns `false` if this live query was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::debug!("closing live query {}", self.key());
        self.executor.close();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.executor.is_closed()
    }
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("key", self.key())
            .field("closed", &self.is_closed())
            .finish()
    }
}
