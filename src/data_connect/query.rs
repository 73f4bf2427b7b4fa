use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::data_connect::error::{DataConnectError, DataConnectResult};
use crate::data_connect::live_queries::{LiveQueries, QuerySpec};
use crate::data_connect::query_executor::QueryExecutorResult;
use crate::data_connect::reference::DataSource;
use crate::data_connect::sequenced::SequencedReference;
use crate::data_connect::transport::{DataConnectTransport, OperationResult};
use crate::platform::runtime;

type ValueCallback = dyn Fn() + Send + Sync + 'static;
type DataCallback<T> = dyn Fn(&T) + Send + Sync + 'static;

pub type QueryResultCallback<T> = Arc<DataCallback<T>>;
pub type QueryErrorCallback = Arc<DataCallback<DataConnectError>>;
pub type QueryCompleteCallback = Arc<ValueCallback>;

/// Observer-style subscription handlers.
pub struct QuerySubscriptionHandlers<T> {
    pub on_next: QueryResultCallback<T>,
    pub on_error: Option<QueryErrorCallback>,
    pub on_complete: Option<QueryCompleteCallback>,
}

impl<T> QuerySubscriptionHandlers<T> {
    pub fn new(on_next: QueryResultCallback<T>) -> Self {
        Self {
            on_next,
            on_error: None,
            on_complete: None,
        }
    }

    pub fn with_error(mut self, callback: QueryErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn with_complete(mut self, callback: QueryCompleteCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub(crate) fn error(&self, error: &DataConnectError) {
        match &self.on_error {
            Some(on_error) => on_error(error),
            None => log::debug!("unhandled query subscription error: {error}"),
        }
    }
}

impl<T> Clone for QuerySubscriptionHandlers<T> {
    fn clone(&self) -> Self {
        Self {
            on_next: self.on_next.clone(),
            on_error: self.on_error.clone(),
            on_complete: self.on_complete.clone(),
        }
    }
}

/// Successful query response as seen by the query manager.
#[derive(Clone, Debug)]
pub struct QueryUpdate {
    pub request_id: String,
    pub data: Arc<OperationResult>,
    pub source: DataSource,
}

/// Guard returned when subscribing to a query.
///
/// Dropping the handle ends the subscription; `on_complete` runs once the background
/// task has let go of the query.
pub struct QuerySubscriptionHandle {
    cancellation: CancellationToken,
    closed: AtomicBool,
}

impl QuerySubscriptionHandle {
    fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            closed: AtomicBool::new(false),
        }
    }

    pub fn unsubscribe(mut self) {
        self.close();
    }

    pub fn is_active(&self) -> bool {
        !self.cancellation.is_cancelled()
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancellation.cancel();
        }
    }
}

impl Drop for QuerySubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Executes and subscribes to queries through the shared live-query registry.
#[derive(Clone)]
pub struct QueryManager {
    live_queries: LiveQueries,
    cancellation: CancellationToken,
}

impl QueryManager {
    pub fn new(
        transport: Arc<dyn DataConnectTransport>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            live_queries: LiveQueries::new(transport, cancellation.clone()),
            cancellation,
        }
    }

    pub fn live_queries(&self) -> &LiveQueries {
        &self.live_queries
    }

    /// Executes `spec`, sharing the network call with concurrent executions of the same query.
    pub async fn execute(
        &self,
        spec: QuerySpec,
    ) -> DataConnectResult<SequencedReference<QueryUpdate>> {
        let result = self
            .live_queries
            .with_live_query(spec, |live_query| async move { live_query.execute().await })
            .await;
        into_update(result, DataSource::Server)
    }

    /// Delivers the cached results of `spec` and every later one to `handlers` until the
    /// returned handle is dropped or the manager is closed.
    pub fn subscribe(
        &self,
        spec: QuerySpec,
        execute_query: bool,
        handlers: QuerySubscriptionHandlers<SequencedReference<QueryUpdate>>,
    ) -> QuerySubscriptionHandle {
        let lease = self.live_queries.acquire(spec);
        let mut updates = lease.live_query().subscribe(execute_query);
        let replayed_through = updates.replayed_through();
        let cancellation = self.cancellation.child_token();
        let task_cancellation = cancellation.clone();

        runtime::spawn_detached(async move {
            log::debug!("subscribed to {}", lease.key());
            loop {
                let next = tokio::select! {
                    biased;
                    _ = task_cancellation.cancelled() => None,
                    next = updates.next() => next,
                };
                let Some(result) = next else { break };
                let source = if result.sequence_number <= replayed_through {
                    DataSource::Cache
                } else {
                    DataSource::Server
                };
                let delivered = catch_unwind(AssertUnwindSafe(|| {
                    match into_update(result, source) {
                        Ok(update) => (handlers.on_next)(&update),
                        Err(error) => handlers.error(&error),
                    }
                }));
                if delivered.is_err() {
                    log::error!("subscription handler for {} panicked", lease.key());
                    break;
                }
            }
            log::debug!("unsubscribed from {}", lease.key());
            drop(lease);
            if let Some(on_complete) = &handlers.on_complete {
                on_complete();
            }
        });

        QuerySubscriptionHandle::new(cancellation)
    }
}

fn into_update(
    result: SequencedReference<QueryExecutorResult>,
    source: DataSource,
) -> DataConnectResult<SequencedReference<QueryUpdate>> {
    let sequence_number = result.sequence_number;
    match result.value {
        QueryExecutorResult::Success {
            request_id, data, ..
        } => Ok(SequencedReference::new(
            sequence_number,
            QueryUpdate {
                request_id,
                data,
                source,
            },
        )),
        QueryExecutorResult::Failure { error, .. } => Err(error),
    }
}
