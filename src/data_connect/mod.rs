//! Firebase Data Connect client.
//!
//! Queries go through a registry of shared live queries: concurrent executions of the same
//! operation and variables share one network call, and every result carries a sequence
//! number so that stale responses never replace newer ones. Mutations are sent as-is.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use firebase_dataconnect::data_connect::{
//!     get_data_connect, ConnectorConfig, DataConnectOptions, QueryResult,
//!     QuerySubscriptionHandlers,
//! };
//! use firebase_dataconnect::platform::{Deferred, InternalAuthProvider};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize)]
//! struct ListMoviesVariables {
//!     limit: u32,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct ListMoviesData {
//!     movies: Vec<serde_json::Value>,
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = ConnectorConfig::new("us-central1", "movies", "movie-service")?;
//! let options = DataConnectOptions::new(connector, "my-project")?.with_api_key("api-key");
//! let auth = Deferred::<dyn InternalAuthProvider>::new();
//! let service = get_data_connect(options, None, &auth)?;
//!
//! let query = service.query::<ListMoviesData, _>("ListMovies", ListMoviesVariables { limit: 10 });
//! let result = query.execute().await?;
//! println!("{} movies (request {})", result.data.movies.len(), result.request_id);
//!
//! let _subscription = query.subscribe(QuerySubscriptionHandlers::new(Arc::new(
//!     |result: &QueryResult<ListMoviesData, ListMoviesVariables>| {
//!         println!("update from {:?}: {:?}", result.source, result.data);
//!     },
//! )))?;
//! # Ok(())
//! # }
//! ```

mod api;
mod auth;
mod codec;
mod config;
mod constants;
mod error;
mod live_queries;
mod live_query;
mod mutation;
mod query;
mod query_executor;
mod ref_counted;
mod reference;
mod sequenced;
mod transport;

pub use api::{get_data_connect, DataConnectService};
pub use auth::{AuthChangeListener, DataConnectAuth};
pub use codec::{canonical_bytes, decode_data, encode_variables, Struct};
pub use config::{parse_emulator_host, ConnectorConfig, DataConnectOptions, DataConnectSettings};
pub use constants::{DEFAULT_EMULATOR_PORT, EMULATOR_HOST_ENV_VAR};
pub use error::{
    auth_error, cancelled_error, closed_error, decode_error, encode_error, internal_error,
    invalid_argument, network_error, operation_error, unauthorized, DataConnectError,
    DataConnectErrorCode, DataConnectErrorPathSegment, DataConnectOperationFailureResponse,
    DataConnectOperationFailureResponseErrorInfo, DataConnectResult,
};
pub use live_queries::{LiveQueries, LiveQueryLease, QueryKey, QuerySpec};
pub use live_query::LiveQuery;
pub use mutation::{MutationManager, MutationResponse};
pub use query::{
    QueryCompleteCallback, QueryErrorCallback, QueryManager, QueryResultCallback,
    QuerySubscriptionHandle, QuerySubscriptionHandlers, QueryUpdate,
};
pub use query_executor::{
    QueryExecutor, QueryExecutorResult, QueryExecutorState, QueryExecutorUpdates,
};
pub use reference::{DataSource, MutationRef, MutationResult, QueryRef, QueryResult};
pub use ref_counted::ReferenceCounted;
pub use sequenced::{next_sequence_number, SequencedReference};
pub use transport::{
    new_request_id, CallerSdkType, DataConnectTransport, OperationResult, RestTransport,
};
