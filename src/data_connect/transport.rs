use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::data_connect::auth::DataConnectAuth;
use crate::data_connect::codec::Struct;
use crate::data_connect::config::{DataConnectOptions, DataConnectSettings};
use crate::data_connect::constants::{
    API_VERSION, HEADER_API_CLIENT, HEADER_AUTH_TOKEN, HEADER_GMPID, HEADER_REQUEST_PARAMS,
    REQUEST_ID_LENGTH,
};
use crate::data_connect::error::{
    decode_error, internal_error, network_error, unauthorized, DataConnectErrorPathSegment,
    DataConnectOperationFailureResponse, DataConnectOperationFailureResponseErrorInfo,
    DataConnectResult,
};

/// What the backend returned for one operation. GraphQL errors are data here, not failures.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperationResult {
    pub data: Option<Value>,
    pub errors: Vec<DataConnectOperationFailureResponseErrorInfo>,
}

impl OperationResult {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn to_failure_response(&self) -> DataConnectOperationFailureResponse {
        DataConnectOperationFailureResponse {
            data: self.data.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Random alphanumeric id attached to one execution attempt for backend log correlation.
pub fn new_request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Identifies the SDK flavour issuing requests, reported in `x-goog-api-client`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallerSdkType {
    #[default]
    Base,
    Generated,
}

#[async_trait]
pub trait DataConnectTransport: Send + Sync {
    async fn execute_query(
        &self,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult>;

    async fn execute_mutation(
        &self,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult>;
}

/// HTTP/JSON transport for the `executeQuery` / `executeMutation` connector methods.
pub struct RestTransport {
    client: reqwest::Client,
    options: DataConnectOptions,
    settings: DataConnectSettings,
    auth: DataConnectAuth,
    caller_sdk_type: CallerSdkType,
}

impl RestTransport {
    pub fn new(
        options: DataConnectOptions,
        settings: DataConnectSettings,
        auth: DataConnectAuth,
        caller_sdk_type: CallerSdkType,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            options,
            settings,
            auth,
            caller_sdk_type,
        }
    }

    fn endpoint_url(&self, action: &str) -> DataConnectResult<Url> {
        let path = format!(
            "{}/{API_VERSION}/{}:{action}",
            self.settings.base_url(),
            self.options.resource_path()
        );
        let mut url = Url::parse(&path).map_err(|err| internal_error(err.to_string()))?;
        if let Some(key) = &self.options.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    fn goog_api_client_header(&self) -> String {
        let sdk_version = env!("CARGO_PKG_VERSION");
        let mut header = format!("gl-rs/ fire/{sdk_version}");
        if self.caller_sdk_type == CallerSdkType::Generated {
            header.push_str(" rs/gen");
        }
        header
    }

    async fn build_headers(&self, request_id: &str) -> DataConnectResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        insert_header(&mut headers, HEADER_API_CLIENT, &self.goog_api_client_header())?;
        insert_header(
            &mut headers,
            HEADER_REQUEST_PARAMS,
            &format!("location={}&frontend=data", self.options.connector.location),
        )?;

        if let Some(app_id) = self.options.app_id.as_deref().filter(|id| !id.is_empty()) {
            insert_header(&mut headers, HEADER_GMPID, app_id)?;
        }

        if let Some(token) = self.auth.get_access_token(request_id).await? {
            if !token.is_empty() {
                insert_header(&mut headers, HEADER_AUTH_TOKEN, &token)?;
            }
        }
        Ok(headers)
    }

    async fn perform_request(
        &self,
        action: &str,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult> {
        let mut body = serde_json::Map::new();
        body.insert(
            "name".to_string(),
            Value::String(self.options.resource_path()),
        );
        body.insert(
            "operationName".to_string(),
            Value::String(operation_name.to_string()),
        );
        body.insert("variables".to_string(), Value::Object(variables.clone()));

        let headers = self.build_headers(request_id).await?;
        let url = self.endpoint_url(action)?;

        log::debug!("[rid={request_id}] {action} {operation_name}");
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|err| network_error(format!("{action} request failed: {err}")))?;

        let status = response.status();
        if status.as_u16() == 401 {
            log::debug!("[rid={request_id}] {action} unauthorized; forcing token refresh");
            self.auth.force_refresh();
            return Err(unauthorized("Request unauthorized"));
        }
        if !status.is_success() {
            return Err(network_error(format!(
                "Data Connect request failed with status {status}"
            )));
        }

        let graph_response: GraphQlResponse = response
            .json()
            .await
            .map_err(|err| decode_error(format!("invalid {action} response: {err}")))?;
        let result = graph_response.into_operation_result();
        if result.has_errors() {
            log::debug!(
                "[rid={request_id}] {action} {operation_name} returned {} error(s)",
                result.errors.len()
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl DataConnectTransport for RestTransport {
    async fn execute_query(
        &self,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult> {
        self.perform_request("executeQuery", request_id, operation_name, variables)
            .await
    }

    async fn execute_mutation(
        &self,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult> {
        self.perform_request("executeMutation", request_id, operation_name, variables)
            .await
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> DataConnectResult<()> {
    let value = HeaderValue::from_str(value).map_err(|err| internal_error(err.to_string()))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: Option<String>,
    path: Option<Vec<Value>>,
}

impl GraphQlResponse {
    fn into_operation_result(self) -> OperationResult {
        OperationResult {
            data: self.data.filter(|data| !data.is_null()),
            errors: self
                .errors
                .into_iter()
                .map(|error| DataConnectOperationFailureResponseErrorInfo {
                    message: error
                        .message
                        .unwrap_or_else(|| "Unknown Data Connect error".to_string()),
                    path: error
                        .path
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|segment| match segment {
                            Value::String(field) => Some(DataConnectErrorPathSegment::Field(field)),
                            Value::Number(num) => {
                                num.as_i64().map(DataConnectErrorPathSegment::Index)
                            }
                            _ => None,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graphql_errors_are_kept_as_data() {
        let response: GraphQlResponse = serde_json::from_value(json!({
            "data": { "movie": null },
            "errors": [
                { "message": "denied", "path": ["movie", 0, true] },
                { "path": [] }
            ]
        }))
        .unwrap();
        let result = response.into_operation_result();
        assert_eq!(result.data, Some(json!({ "movie": null })));
        assert_eq!(result.errors.len(), 2);
        assert_eq!(
            result.errors[0].path,
            vec![
                DataConnectErrorPathSegment::Field("movie".into()),
                DataConnectErrorPathSegment::Index(0),
            ]
        );
        assert_eq!(result.errors[1].message, "Unknown Data Connect error");
    }

    #[test]
    fn request_ids_are_random_alphanumerics() {
        let first = new_request_id();
        let second = new_request_id();
        assert_eq!(first.len(), 20);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }

    #[test]
    fn null_data_is_absent() {
        let response: GraphQlResponse = serde_json::from_value(json!({ "data": null })).unwrap();
        let result = response.into_operation_result();
        assert_eq!(result.data, None);
        assert!(!result.has_errors());
    }

    #[test]
    fn api_client_header_marks_generated_sdks() {
        let connector = crate::data_connect::config::ConnectorConfig::new("l", "c", "s").unwrap();
        let options = DataConnectOptions::new(connector, "p").unwrap().with_api_key("k");
        let transport = RestTransport::new(
            options,
            DataConnectSettings::default(),
            DataConnectAuth::unavailable(),
            CallerSdkType::Generated,
        );
        assert!(transport.goog_api_client_header().ends_with(" rs/gen"));
        assert_eq!(
            transport.endpoint_url("executeQuery").unwrap().as_str(),
            "https://firebasedataconnect.googleapis.com/v1/projects/p/locations/l/services/s/connectors/c:executeQuery?key=k"
        );
    }
}
