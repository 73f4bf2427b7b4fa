use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::data_connect::auth::DataConnectAuth;
use crate::data_connect::config::{ConnectorConfig, DataConnectOptions, DataConnectSettings};
use crate::data_connect::error::{closed_error, invalid_argument, DataConnectResult};
use crate::data_connect::mutation::MutationManager;
use crate::data_connect::query::QueryManager;
use crate::data_connect::reference::{MutationRef, QueryRef};
use crate::data_connect::transport::{CallerSdkType, DataConnectTransport, RestTransport};
use crate::platform::{Deferred, InternalAuthProvider};

type CacheKey = (String, ConnectorConfig);

static DATA_CONNECT_CACHE: LazyLock<Mutex<HashMap<CacheKey, DataConnectService>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Entry point for one Data Connect connector.
///
/// Network components are built on the first operation; until then the emulator and caller
/// SDK type may still be changed.
#[derive(Clone)]
pub struct DataConnectService {
    inner: Arc<DataConnectInner>,
}

struct DataConnectInner {
    options: DataConnectOptions,
    auth: DataConnectAuth,
    state: Mutex<ServiceState>,
    cancellation: CancellationToken,
}

struct ServiceState {
    settings: DataConnectSettings,
    caller_sdk_type: CallerSdkType,
    transport: Option<Arc<dyn DataConnectTransport>>,
    components: Option<Components>,
    closed: bool,
}

#[derive(Clone)]
struct Components {
    query_manager: QueryManager,
    mutation_manager: MutationManager,
}

impl DataConnectService {
    /// Creates an uncached instance that talks to the backend described by `settings`.
    pub fn new(
        options: DataConnectOptions,
        settings: DataConnectSettings,
        auth: DataConnectAuth,
    ) -> Self {
        Self::build(options, settings, auth, None)
    }

    /// Creates an uncached instance on top of an existing transport. Auth is left to the
    /// transport.
    pub fn with_transport(
        options: DataConnectOptions,
        transport: Arc<dyn DataConnectTransport>,
    ) -> Self {
        Self::build(
            options,
            DataConnectSettings::default(),
            DataConnectAuth::unavailable(),
            Some(transport),
        )
    }

    fn build(
        options: DataConnectOptions,
        settings: DataConnectSettings,
        auth: DataConnectAuth,
        transport: Option<Arc<dyn DataConnectTransport>>,
    ) -> Self {
        Self {
            inner: Arc::new(DataConnectInner {
                options,
                auth,
                state: Mutex::new(ServiceState {
                    settings,
                    caller_sdk_type: CallerSdkType::default(),
                    transport,
                    components: None,
                    closed: false,
                }),
                cancellation: CancellationToken::new(),
            }),
        }
    }

    pub fn options(&self) -> &DataConnectOptions {
        &self.inner.options
    }

    pub fn auth(&self) -> &DataConnectAuth {
        &self.inner.auth
    }

    pub fn settings(&self) -> DataConnectSettings {
        self.inner.lock_state().settings.clone()
    }

    /// Routes requests to a local emulator. Fails once an operation has been issued.
    pub fn use_emulator(&self, host: Option<&str>, port: Option<u16>) -> DataConnectResult<()> {
        let mut state = self.inner.lock_state();
        state.ensure_configurable("use_emulator()")?;
        state.settings = DataConnectSettings::emulator(host, port);
        log::debug!(
            "{} routed to emulator at {}",
            self.inner.options.connector,
            state.settings.base_url()
        );
        Ok(())
    }

    /// Sets the SDK flavour reported to the backend. Fails once an operation has been issued.
    pub fn set_caller_sdk_type(&self, caller_sdk_type: CallerSdkType) -> DataConnectResult<()> {
        let mut state = self.inner.lock_state();
        state.ensure_configurable("set_caller_sdk_type()")?;
        state.caller_sdk_type = caller_sdk_type;
        Ok(())
    }

    pub fn query<Data, Variables>(
        &self,
        operation_name: &str,
        variables: Variables,
    ) -> QueryRef<Data, Variables> {
        QueryRef::new(self.clone(), operation_name, variables)
    }

    pub fn mutation<Data, Variables>(
        &self,
        operation_name: &str,
        variables: Variables,
    ) -> MutationRef<Data, Variables> {
        MutationRef::new(self.clone(), operation_name, variables)
    }

    pub fn query_manager(&self) -> DataConnectResult<QueryManager> {
        Ok(self.components()?.query_manager)
    }

    pub fn mutation_manager(&self) -> DataConnectResult<MutationManager> {
        Ok(self.components()?.mutation_manager)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Cancels outstanding work and subscriptions and releases auth. Later operations fail
    /// with a closed error. Calling it again has no effect.
    pub fn close(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.components = None;
            state.transport = None;
        }
        log::debug!("closing Data Connect instance {}", self.inner.options.connector);
        self.inner.cancellation.cancel();
        self.inner.auth.close();

        let key = cache_key(&self.inner.options);
        let mut cache = lock_cache();
        if cache
            .get(&key)
            .is_some_and(|cached| Arc::ptr_eq(&cached.inner, &self.inner))
        {
            cache.remove(&key);
        }
    }

    fn components(&self) -> DataConnectResult<Components> {
        let mut state = self.inner.lock_state();
        if state.closed {
            return Err(closed_error("Data Connect instance has been closed"));
        }
        if let Some(components) = &state.components {
            return Ok(components.clone());
        }

        let transport = match &state.transport {
            Some(transport) => transport.clone(),
            None => {
                let transport: Arc<dyn DataConnectTransport> = Arc::new(RestTransport::new(
                    self.inner.options.clone(),
                    state.settings.clone(),
                    self.inner.auth.clone(),
                    state.caller_sdk_type,
                ));
                state.transport = Some(transport.clone());
                transport
            }
        };
        log::debug!(
            "initialising Data Connect {} against {}",
            self.inner.options.connector,
            state.settings.base_url()
        );
        let components = Components {
            query_manager: QueryManager::new(
                transport.clone(),
                self.inner.cancellation.child_token(),
            ),
            mutation_manager: MutationManager::new(
                transport,
                self.inner.cancellation.child_token(),
            ),
        };
        state.components = Some(components.clone());
        Ok(components)
    }
}

impl DataConnectInner {
    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ServiceState {
    fn ensure_configurable(&self, operation: &str) -> DataConnectResult<()> {
        if self.closed {
            return Err(closed_error("Data Connect instance has been closed"));
        }
        if self.components.is_some() {
            return Err(invalid_argument(format!(
                "{operation} must be called before any operation is executed"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for DataConnectService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConnectService")
            .field("options", &self.inner.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn cache_key(options: &DataConnectOptions) -> CacheKey {
    (options.project_id.clone(), options.connector.clone())
}

fn lock_cache() -> MutexGuard<'static, HashMap<CacheKey, DataConnectService>> {
    DATA_CONNECT_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns the shared instance for `options`, creating it on first use.
///
/// Without explicit `settings`, `FIREBASE_DATA_CONNECT_EMULATOR_HOST` is honoured and the
/// production host is used otherwise. Asking for an existing instance with different
/// settings is an error.
pub fn get_data_connect(
    options: DataConnectOptions,
    settings: Option<DataConnectSettings>,
    auth_provider: &Deferred<dyn InternalAuthProvider>,
) -> DataConnectResult<DataConnectService> {
    let key = cache_key(&options);
    let mut cache = lock_cache();
    if let Some(existing) = cache.get(&key) {
        if let Some(requested) = &settings {
            let current = existing.settings();
            if *requested != current {
                return Err(invalid_argument(format!(
                    "Data Connect instance for {} already exists with settings {current:?}",
                    options.connector
                )));
            }
        }
        return Ok(existing.clone());
    }

    let settings = match settings {
        Some(settings) => settings,
        None => DataConnectSettings::from_env()?.unwrap_or_default(),
    };
    let service = DataConnectService::new(options, settings, DataConnectAuth::new(auth_provider));
    cache.insert(key, service.clone());
    Ok(service)
}
