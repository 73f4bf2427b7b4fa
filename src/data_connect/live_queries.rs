use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::data_connect::codec::{canonical_bytes, Struct};
use crate::data_connect::live_query::LiveQuery;
use crate::data_connect::ref_counted::ReferenceCounted;
use crate::data_connect::transport::DataConnectTransport;

/// The operation and encoded variables of a query.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySpec {
    pub operation_name: String,
    pub variables: Struct,
}

impl QuerySpec {
    pub fn new(operation_name: impl Into<String>, variables: Struct) -> Self {
        Self {
            operation_name: operation_name.into(),
            variables,
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::new(&self.operation_name, &self.variables)
    }
}

/// Identity of a live query: the operation name plus a digest of its variables.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    operation_name: String,
    variables_hash: String,
}

impl QueryKey {
    pub fn new(operation_name: &str, variables: &Struct) -> Self {
        let digest = Sha256::digest(canonical_bytes(variables));
        Self {
            operation_name: operation_name.to_string(),
            variables_hash: URL_SAFE_NO_PAD.encode(digest),
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn variables_hash(&self) -> &str {
        &self.variables_hash
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation_name, self.variables_hash)
    }
}

type Registry = HashMap<QueryKey, ReferenceCounted<Arc<LiveQuery>>>;

/// Registry of reference-counted [`LiveQuery`] instances, one per [`QueryKey`].
#[derive(Clone)]
pub struct LiveQueries {
    inner: Arc<LiveQueriesInner>,
}

struct LiveQueriesInner {
    transport: Arc<dyn DataConnectTransport>,
    registry: Mutex<Registry>,
    cancellation: CancellationToken,
}

impl LiveQueries {
    /// Live queries are cancelled together with `cancellation`.
    pub fn new(
        transport: Arc<dyn DataConnectTransport>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(LiveQueriesInner {
                transport,
                registry: Mutex::new(HashMap::new()),
                cancellation,
            }),
        }
    }

    /// Runs `block` with the live query for `spec`, creating it if needed.
    ///
    /// The live query is released when `block` finishes or when the returned future is
    /// dropped, whichever comes first.
    pub async fn with_live_query<F, Fut, T>(&self, spec: QuerySpec, block: F) -> T
    where
        F: FnOnce(Arc<LiveQuery>) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self.acquire(spec);
        block(lease.live_query().clone()).await
    }

    /// Takes a reference on the live query for `spec` until the returned lease is dropped.
    pub fn acquire(&self, spec: QuerySpec) -> LiveQueryLease {
        let key = spec.key();
        let live_query = {
            let mut registry = self.inner.lock_registry();
            let entry = registry.entry(key.clone()).or_insert_with(|| {
                log::debug!("creating live query {key}");
                ReferenceCounted::new(Arc::new(LiveQuery::new(
                    spec,
                    self.inner.transport.clone(),
                    self.inner.cancellation.child_token(),
                )))
            });
            entry.increment();
            entry.object().clone()
        };
        LiveQueryLease {
            registry: self.inner.clone(),
            key,
            live_query,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock_registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ref_count(&self, key: &QueryKey) -> usize {
        self.inner
            .lock_registry()
            .get(key)
            .map_or(0, ReferenceCounted::ref_count)
    }
}

impl LiveQueriesInner {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, key: &QueryKey, live_query: &Arc<LiveQuery>) {
        if let Err(message) = self.try_release(key, live_query) {
            panic!("{message}");
        }
    }

    /// Drops one reference on `live_query`, closing it with the last one.
    ///
    /// Fails without touching the registry if `live_query` is not the instance
    /// registered under `key`.
    fn try_release(&self, key: &QueryKey, live_query: &Arc<LiveQuery>) -> Result<(), String> {
        let removed = {
            let mut registry = self.lock_registry();
            let entry = registry
                .get_mut(key)
                .ok_or_else(|| format!("released live query {key} is not registered"))?;
            if !Arc::ptr_eq(entry.object(), live_query) {
                return Err(format!(
                    "released live query {key} does not match the registered instance"
                ));
            }
            if entry.decrement() == 0 {
                registry.remove(key).map(ReferenceCounted::into_object)
            } else {
                None
            }
        };
        match removed {
            Some(live_query) if !live_query.close() => {
                Err(format!("live query {key} was closed twice"))
            }
            _ => Ok(()),
        }
    }
}

/// A held reference on a [`LiveQuery`]. Dropping it releases the reference.
pub struct LiveQueryLease {
    registry: Arc<LiveQueriesInner>,
    key: QueryKey,
    live_query: Arc<LiveQuery>,
}

impl LiveQueryLease {
    pub fn live_query(&self) -> &Arc<LiveQuery> {
        &self.live_query
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl Drop for LiveQueryLease {
    fn drop(&mut self) {
        if let Err(message) = self.registry.try_release(&self.key, &self.live_query) {
            // A second panic while unwinding would abort the process.
            if std::thread::panicking() {
                log::error!("{message}");
            } else {
                panic!("{message}");
            }
        }
    }
}
