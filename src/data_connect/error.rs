use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataConnectErrorCode {
    InvalidArgument,
    Internal,
    Unauthorized,
    /// Transport failure talking to the backend; safe to retry.
    Network,
    /// The backend answered with a non-empty GraphQL error list.
    OperationFailed,
    Encode,
    Decode,
    Auth,
    /// The owning instance was closed before the call started.
    Closed,
    /// The call was in flight when the owning instance was closed.
    Cancelled,
}

impl DataConnectErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataConnectErrorCode::InvalidArgument => "data-connect/invalid-argument",
            DataConnectErrorCode::Internal => "data-connect/internal",
            DataConnectErrorCode::Unauthorized => "data-connect/unauthorized",
            DataConnectErrorCode::Network => "data-connect/network",
            DataConnectErrorCode::OperationFailed => "data-connect/operation-failed",
            DataConnectErrorCode::Encode => "data-connect/encode",
            DataConnectErrorCode::Decode => "data-connect/decode",
            DataConnectErrorCode::Auth => "data-connect/auth",
            DataConnectErrorCode::Closed => "data-connect/closed",
            DataConnectErrorCode::Cancelled => "data-connect/cancelled",
        }
    }
}

/// One element of a GraphQL error path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataConnectErrorPathSegment {
    Field(String),
    Index(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataConnectOperationFailureResponseErrorInfo {
    pub message: String,
    pub path: Vec<DataConnectErrorPathSegment>,
}

impl Display for DataConnectOperationFailureResponseErrorInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            return f.write_str(&self.message);
        }
        let mut path = String::new();
        for segment in &self.path {
            match segment {
                DataConnectErrorPathSegment::Field(field) => {
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(field);
                }
                DataConnectErrorPathSegment::Index(index) => {
                    path.push_str(&format!("[{index}]"));
                }
            }
        }
        write!(f, "{} at {}", self.message, path)
    }
}

/// Raw response of an operation whose GraphQL error list was not empty.
#[derive(Clone, Debug, PartialEq)]
pub struct DataConnectOperationFailureResponse {
    pub data: Option<Value>,
    pub errors: Vec<DataConnectOperationFailureResponseErrorInfo>,
}

#[derive(Clone, Debug)]
pub struct DataConnectError {
    pub code: DataConnectErrorCode,
    message: String,
    response: Option<Arc<DataConnectOperationFailureResponse>>,
}

impl DataConnectError {
    pub fn new(code: DataConnectErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            response: None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The partial data and error list returned by the backend, for `OperationFailed` errors.
    pub fn response(&self) -> Option<&DataConnectOperationFailureResponse> {
        self.response.as_deref()
    }
}

impl Display for DataConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for DataConnectError {}

pub type DataConnectResult<T> = Result<T, DataConnectError>;

pub fn invalid_argument(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Internal, message)
}

pub fn unauthorized(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Unauthorized, message)
}

pub fn network_error(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Network, message)
}

pub fn encode_error(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Encode, message)
}

pub fn decode_error(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Decode, message)
}

pub fn auth_error(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Auth, message)
}

pub fn closed_error(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Closed, message)
}

pub fn cancelled_error(message: impl Into<String>) -> DataConnectError {
    DataConnectError::new(DataConnectErrorCode::Cancelled, message)
}

pub fn operation_error(
    message: impl Into<String>,
    response: DataConnectOperationFailureResponse,
) -> DataConnectError {
    DataConnectError {
        code: DataConnectErrorCode::OperationFailed,
        message: message.into(),
        response: Some(Arc::new(response)),
    }
}
