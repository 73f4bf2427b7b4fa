use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data_connect::api::DataConnectService;
use crate::data_connect::codec::{decode_data, encode_variables};
use crate::data_connect::error::{operation_error, DataConnectResult};
use crate::data_connect::live_queries::QuerySpec;
use crate::data_connect::query::{QuerySubscriptionHandle, QuerySubscriptionHandlers, QueryUpdate};
use crate::data_connect::sequenced::SequencedReference;
use crate::data_connect::transport::OperationResult;

/// Indicates where a result originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSource {
    /// Stored before the subscription that delivered it started.
    Cache,
    Server,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Cache => "CACHE",
            DataSource::Server => "SERVER",
        }
    }
}

/// Strongly typed reference to a query operation.
pub struct QueryRef<Data, Variables> {
    service: DataConnectService,
    operation_name: Arc<str>,
    variables: Variables,
    _data: PhantomData<fn() -> Data>,
}

impl<Data, Variables> QueryRef<Data, Variables> {
    pub(crate) fn new(
        service: DataConnectService,
        operation_name: impl Into<Arc<str>>,
        variables: Variables,
    ) -> Self {
        Self {
            service,
            operation_name: operation_name.into(),
            variables,
            _data: PhantomData,
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn service(&self) -> &DataConnectService {
        &self.service
    }

    /// Same operation with different variables.
    pub fn with_variables<V>(&self, variables: V) -> QueryRef<Data, V> {
        QueryRef::new(self.service.clone(), self.operation_name.clone(), variables)
    }
}

impl<Data, Variables> QueryRef<Data, Variables>
where
    Data: DeserializeOwned,
    Variables: Serialize + Clone,
{
    fn spec(&self) -> DataConnectResult<QuerySpec> {
        Ok(QuerySpec::new(
            self.operation_name.as_ref(),
            encode_variables(&self.variables)?,
        ))
    }

    pub async fn execute(&self) -> DataConnectResult<QueryResult<Data, Variables>> {
        let spec = self.spec()?;
        let update = self.service.query_manager()?.execute(spec).await?;
        Ok(QueryResult {
            data: decode_response(&self.operation_name, &update.value.data)?,
            source: update.value.source,
            sequence_number: update.sequence_number,
            request_id: update.value.request_id,
            query_ref: self.clone(),
        })
    }
}

impl<Data, Variables> QueryRef<Data, Variables>
where
    Data: DeserializeOwned + Send + Sync + 'static,
    Variables: Serialize + Clone + Send + Sync + 'static,
{
    /// Subscribes to results of this query and triggers one execution.
    ///
    /// GraphQL and decoding errors are reported to `on_error`; the subscription stays open.
    pub fn subscribe(
        &self,
        handlers: QuerySubscriptionHandlers<QueryResult<Data, Variables>>,
    ) -> DataConnectResult<QuerySubscriptionHandle> {
        let spec = self.spec()?;
        let manager = self.service.query_manager()?;
        let query_ref = self.clone();
        let typed = handlers.clone();

        let untyped = QuerySubscriptionHandlers {
            on_next: Arc::new(move |update: &SequencedReference<QueryUpdate>| {
                match decode_response(&query_ref.operation_name, &update.value.data) {
                    Ok(data) => (typed.on_next)(&QueryResult {
                        data,
                        source: update.value.source,
                        sequence_number: update.sequence_number,
                        request_id: update.value.request_id.clone(),
                        query_ref: query_ref.clone(),
                    }),
                    Err(error) => typed.error(&error),
                }
            }),
            on_error: handlers.on_error,
            on_complete: handlers.on_complete,
        };
        Ok(manager.subscribe(spec, true, untyped))
    }
}

impl<Data, Variables: Clone> Clone for QueryRef<Data, Variables> {
    fn clone(&self) -> Self {
        Self::new(
            self.service.clone(),
            self.operation_name.clone(),
            self.variables.clone(),
        )
    }
}

impl<Data, Variables: fmt::Debug> fmt::Debug for QueryRef<Data, Variables> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRef")
            .field("operation_name", &self.operation_name)
            .field("variables", &self.variables)
            .finish()
    }
}

/// Strongly typed reference to a mutation operation.
pub struct MutationRef<Data, Variables> {
    service: DataConnectService,
    operation_name: Arc<str>,
    variables: Variables,
    _data: PhantomData<fn() -> Data>,
}

impl<Data, Variables> MutationRef<Data, Variables> {
    pub(crate) fn new(
        service: DataConnectService,
        operation_name: impl Into<Arc<str>>,
        variables: Variables,
    ) -> Self {
        Self {
            service,
            operation_name: operation_name.into(),
            variables,
            _data: PhantomData,
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn service(&self) -> &DataConnectService {
        &self.service
    }

    pub fn with_variables<V>(&self, variables: V) -> MutationRef<Data, V> {
        MutationRef::new(self.service.clone(), self.operation_name.clone(), variables)
    }
}

impl<Data, Variables> MutationRef<Data, Variables>
where
    Data: DeserializeOwned,
    Variables: Serialize + Clone,
{
    pub async fn execute(&self) -> DataConnectResult<MutationResult<Data, Variables>> {
        let variables = encode_variables(&self.variables)?;
        let response = self
            .service
            .mutation_manager()?
            .execute(&self.operation_name, &variables)
            .await?;
        Ok(MutationResult {
            data: decode_response(&self.operation_name, &response.data)?,
            source: DataSource::Server,
            request_id: response.request_id,
            mutation_ref: self.clone(),
        })
    }
}

impl<Data, Variables: Clone> Clone for MutationRef<Data, Variables> {
    fn clone(&self) -> Self {
        Self::new(
            self.service.clone(),
            self.operation_name.clone(),
            self.variables.clone(),
        )
    }
}

impl<Data, Variables: fmt::Debug> fmt::Debug for MutationRef<Data, Variables> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRef")
            .field("operation_name", &self.operation_name)
            .field("variables", &self.variables)
            .finish()
    }
}

/// Result returned from [`QueryRef::execute`] and query subscriptions.
#[derive(Clone, Debug)]
pub struct QueryResult<Data, Variables> {
    pub data: Data,
    pub source: DataSource,
    pub sequence_number: i64,
    pub request_id: String,
    pub query_ref: QueryRef<Data, Variables>,
}

/// Result returned from [`MutationRef::execute`].
#[derive(Clone, Debug)]
pub struct MutationResult<Data, Variables> {
    pub data: Data,
    pub source: DataSource,
    pub request_id: String,
    pub mutation_ref: MutationRef<Data, Variables>,
}

/// Decodes the data of a response, turning a non-empty GraphQL error list into an
/// `OperationFailed` error that keeps the partial data.
fn decode_response<Data: DeserializeOwned>(
    operation_name: &str,
    result: &OperationResult,
) -> DataConnectResult<Data> {
    if result.has_errors() {
        let details = result
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(operation_error(
            format!("{operation_name} failed: {details}"),
            result.to_failure_response(),
        ));
    }
    decode_data(result.data.clone().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_connect::error::{
        DataConnectErrorCode, DataConnectErrorPathSegment,
        DataConnectOperationFailureResponseErrorInfo,
    };
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Movie {
        title: String,
    }

    #[test]
    fn graphql_errors_become_operation_failures() {
        let result = OperationResult {
            data: Some(json!({ "movie": null })),
            errors: vec![DataConnectOperationFailureResponseErrorInfo {
                message: "permission denied".into(),
                path: vec![DataConnectErrorPathSegment::Field("movie".into())],
            }],
        };
        let err = decode_response::<Movie>("GetMovie", &result).unwrap_err();
        assert_eq!(err.code, DataConnectErrorCode::OperationFailed);
        assert_eq!(err.message(), "GetMovie failed: permission denied at movie");
        let response = err.response().unwrap();
        assert_eq!(response.data, Some(json!({ "movie": null })));
        assert_eq!(response.errors.len(), 1);
    }

    #[test]
    fn data_decodes_into_the_requested_type() {
        let result = OperationResult::from_data(json!({ "title": "Heat" }));
        let movie: Movie = decode_response("GetMovie", &result).unwrap();
        assert_eq!(movie.title, "Heat");

        let err = decode_response::<Movie>("GetMovie", &OperationResult::default()).unwrap_err();
        assert_eq!(err.code, DataConnectErrorCode::Decode);
    }

    #[test]
    fn data_source_strings() {
        assert_eq!(DataSource::Cache.as_str(), "CACHE");
        assert_eq!(serde_json::to_value(DataSource::Server).unwrap(), json!("SERVER"));
    }
}
