//! Deduplicated, sequence-numbered execution of a single query.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::Stream;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::data_connect::error::{
    cancelled_error, closed_error, DataConnectError, DataConnectResult,
};
use crate::data_connect::live_queries::{QueryKey, QuerySpec};
use crate::data_connect::sequenced::{next_sequence_number, SequencedReference};
use crate::data_connect::transport::{new_request_id, DataConnectTransport, OperationResult};
use crate::platform::runtime::spawn_detached;

/// Outcome of one execution attempt, tagged with the query and request id that produced it.
#[derive(Clone, Debug)]
pub enum QueryExecutorResult {
    Success {
        query: QueryKey,
        request_id: String,
        data: Arc<OperationResult>,
    },
    Failure {
        query: QueryKey,
        request_id: String,
        error: DataConnectError,
    },
}

impl QueryExecutorResult {
    pub fn query(&self) -> &QueryKey {
        match self {
            QueryExecutorResult::Success { query, .. } | QueryExecutorResult::Failure { query, .. } => {
                query
            }
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            QueryExecutorResult::Success { request_id, .. }
            | QueryExecutorResult::Failure { request_id, .. } => request_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryExecutorResult::Success { .. })
    }

    pub fn to_result(&self) -> DataConnectResult<Arc<OperationResult>> {
        match self {
            QueryExecutorResult::Success { data, .. } => Ok(data.clone()),
            QueryExecutorResult::Failure { error, .. } => Err(error.clone()),
        }
    }
}

/// Latest published results. Replaced wholesale on every accepted update.
#[derive(Clone, Debug, Default)]
pub struct QueryExecutorState {
    pub last_result: Option<SequencedReference<QueryExecutorResult>>,
    pub last_successful_result: Option<SequencedReference<QueryExecutorResult>>,
}

type InFlightFuture = Shared<BoxFuture<'static, SequencedReference<QueryExecutorResult>>>;

struct InFlight {
    sequence_number: i64,
    future: InFlightFuture,
}

/// Executes one `(operation, variables)` query, at most one network call at a time.
#[derive(Clone)]
pub struct QueryExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    spec: QuerySpec,
    key: QueryKey,
    transport: Arc<dyn DataConnectTransport>,
    state: watch::Sender<QueryExecutorState>,
    in_flight: async_lock::Mutex<Option<InFlight>>,
    cancellation: CancellationToken,
}

impl QueryExecutor {
    pub fn new(
        spec: QuerySpec,
        transport: Arc<dyn DataConnectTransport>,
        cancellation: CancellationToken,
    ) -> Self {
        let key = spec.key();
        let (state, _) = watch::channel(QueryExecutorState::default());
        Self {
            inner: Arc::new(ExecutorInner {
                spec,
                key,
                transport,
                state,
                in_flight: async_lock::Mutex::new(None),
                cancellation,
            }),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.inner.spec
    }

    pub fn state(&self) -> QueryExecutorState {
        self.inner.state.borrow().clone()
    }

    pub fn last_result(&self) -> Option<SequencedReference<QueryExecutorResult>> {
        self.inner.state.borrow().last_result.clone()
    }

    pub fn last_successful_result(&self) -> Option<SequencedReference<QueryExecutorResult>> {
        self.inner.state.borrow().last_successful_result.clone()
    }

    /// Executes the query, joining an execution that is already in flight instead of
    /// issuing a second network call.
    ///
    /// Failures are returned as [`QueryExecutorResult::Failure`] rather than as errors so
    /// that they take part in sequencing like any other result.
    pub async fn execute(&self) -> SequencedReference<QueryExecutorResult> {
        let min_sequence_number = next_sequence_number();
        if let Some(result) = self.result_newer_than(min_sequence_number) {
            return result;
        }

        let future = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(result) = self.result_newer_than(min_sequence_number) {
                return result;
            }
            match in_flight.as_ref() {
                Some(current) => {
                    log::debug!(
                        "{} joining in-flight execution (seq={})",
                        self.inner.key,
                        current.sequence_number
                    );
                    current.future.clone()
                }
                None => {
                    let started = self.start_execution();
                    let future = started.future.clone();
                    *in_flight = Some(started);
                    future
                }
            }
        };

        future.await
    }

    /// Opens a stream of results: first the cached ones, then every newer published result.
    ///
    /// With `execute_query` set, one execution is started in the background; its failure
    /// is only observable through the stream.
    pub fn subscribe(&self, execute_query: bool) -> QueryExecutorUpdates {
        let mut receiver = self.inner.state.subscribe();
        let snapshot = receiver.borrow_and_update().clone();

        let mut pending = VecDeque::new();
        if let Some(successful) = snapshot.last_successful_result {
            pending.push_back(successful);
        }
        if let Some(last) = snapshot.last_result {
            let is_newer = pending
                .back()
                .map_or(true, |queued: &SequencedReference<_>| last.is_newer_than(queued));
            if is_newer {
                pending.push_back(last);
            }
        }
        let replayed_through = pending
            .back()
            .map_or(i64::MIN, |result| result.sequence_number);

        if execute_query {
            let executor = self.clone();
            spawn_detached(async move {
                let _ = executor.execute().await;
            });
        }

        QueryExecutorUpdates {
            receiver,
            pending,
            last_delivered: replayed_through,
            replayed_through,
        }
    }

    /// Cancels the in-flight execution, if any; later executions resolve to a failure.
    pub fn close(&self) {
        self.inner.cancellation.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    fn result_newer_than(
        &self,
        sequence_number: i64,
    ) -> Option<SequencedReference<QueryExecutorResult>> {
        self.inner
            .state
            .borrow()
            .last_result
            .as_ref()
            .filter(|result| result.sequence_number > sequence_number)
            .cloned()
    }

    fn start_execution(&self) -> InFlight {
        let sequence_number = next_sequence_number();
        let request_id = new_request_id();
        let (sender, receiver) = oneshot::channel();

        let inner = self.inner.clone();
        let task_request_id = request_id.clone();
        spawn_detached(async move {
            let result = inner.run(sequence_number, task_request_id).await;
            inner.complete(&result).await;
            let _ = sender.send(result);
        });

        // Weak: the future is stored in the executor's own in-flight slot.
        let executor: Weak<ExecutorInner> = Arc::downgrade(&self.inner);
        let query = self.inner.key.clone();
        let future = async move {
            match receiver.await {
                Ok(result) => result,
                Err(_) => {
                    log::warn!("[rid={request_id}] execution task for {query} was dropped");
                    let result = SequencedReference::new(
                        sequence_number,
                        QueryExecutorResult::Failure {
                            query,
                            request_id,
                            error: cancelled_error("query execution task was dropped"),
                        },
                    );
                    // The task never reached `complete`, so its slot is freed here.
                    if let Some(inner) = executor.upgrade() {
                        inner.complete(&result).await;
                    }
                    result
                }
            }
        }
        .boxed()
        .shared();

        InFlight {
            sequence_number,
            future,
        }
    }
}

impl ExecutorInner {
    async fn run(
        &self,
        sequence_number: i64,
        request_id: String,
    ) -> SequencedReference<QueryExecutorResult> {
        log::debug!("[rid={request_id}] executing {} (seq={sequence_number})", self.key);
        let outcome = if self.cancellation.is_cancelled() {
            Err(closed_error("query executor has been closed"))
        } else {
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    Err(cancelled_error("query execution cancelled by close()"))
                }
                result = self.transport.execute_query(
                    &request_id,
                    &self.spec.operation_name,
                    &self.spec.variables,
                ) => result,
            }
        };

        let query = self.key.clone();
        let value = match outcome {
            Ok(data) => QueryExecutorResult::Success {
                query,
                request_id,
                data: Arc::new(data),
            },
            Err(error) => {
                log::debug!("[rid={request_id}] {} failed: {error}", self.key);
                QueryExecutorResult::Failure {
                    query,
                    request_id,
                    error,
                }
            }
        };
        SequencedReference::new(sequence_number, value)
    }

    async fn complete(&self, result: &SequencedReference<QueryExecutorResult>) {
        let mut in_flight = self.in_flight.lock().await;
        let finished_current = in_flight
            .as_ref()
            .is_some_and(|current| current.sequence_number == result.sequence_number);
        if finished_current {
            *in_flight = None;
        }
        self.publish(result.clone());
    }

    /// Accepts `result` only if it is newer than what is stored. Returns whether it was.
    fn publish(&self, result: SequencedReference<QueryExecutorResult>) -> bool {
        self.state.send_if_modified(|state| {
            let is_newer = state
                .last_result
                .as_ref()
                .map_or(true, |last| result.is_newer_than(last));
            if !is_newer {
                return false;
            }
            if result.value.is_success() {
                let is_newer_success = state
                    .last_successful_result
                    .as_ref()
                    .map_or(true, |last| result.is_newer_than(last));
                if is_newer_success {
                    state.last_successful_result = Some(result.clone());
                }
            }
            state.last_result = Some(result);
            true
        })
    }
}

/// Stream of results published by a [`QueryExecutor`], in strictly increasing sequence order.
pub struct QueryExecutorUpdates {
    receiver: watch::Receiver<QueryExecutorState>,
    pending: VecDeque<SequencedReference<QueryExecutorResult>>,
    last_delivered: i64,
    replayed_through: i64,
}

impl QueryExecutorUpdates {
    /// Waits for the next result. Returns `None` once the executor is gone.
    pub async fn next(&mut self) -> Option<SequencedReference<QueryExecutorResult>> {
        loop {
            if let Some(result) = self.pending.pop_front() {
                return Some(result);
            }
            if self.receiver.changed().await.is_err() {
                return None;
            }
            let latest = self.receiver.borrow_and_update().last_result.clone();
            if let Some(latest) = latest {
                if latest.sequence_number > self.last_delivered {
                    self.last_delivered = latest.sequence_number;
                    return Some(latest);
                }
            }
        }
    }

    /// Results with a sequence number up to this value were already stored when the
    /// subscription started.
    pub fn replayed_through(&self) -> i64 {
        self.replayed_through
    }

    pub fn into_stream(self) -> impl Stream<Item = SequencedReference<QueryExecutorResult>> {
        futures::stream::unfold(self, |mut updates| async move {
            updates.next().await.map(|result| (result, updates))
        })
    }
}
