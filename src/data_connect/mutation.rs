use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::data_connect::codec::Struct;
use crate::data_connect::error::{cancelled_error, closed_error, DataConnectResult};
use crate::data_connect::transport::{new_request_id, DataConnectTransport, OperationResult};

/// Response of one mutation call.
#[derive(Clone, Debug)]
pub struct MutationResponse {
    pub request_id: String,
    pub data: OperationResult,
}

/// Sends mutations straight to the transport. Mutations are never cached or deduplicated.
#[derive(Clone)]
pub struct MutationManager {
    transport: Arc<dyn DataConnectTransport>,
    cancellation: CancellationToken,
}

impl MutationManager {
    pub fn new(
        transport: Arc<dyn DataConnectTransport>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            transport,
            cancellation,
        }
    }

    pub async fn execute(
        &self,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<MutationResponse> {
        if self.cancellation.is_cancelled() {
            return Err(closed_error("mutation manager has been closed"));
        }
        let request_id = new_request_id();
        log::debug!("[rid={request_id}] executing mutation {operation_name}");
        let data = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                return Err(cancelled_error("mutation cancelled by close()"));
            }
            result = self.transport.execute_mutation(&request_id, operation_name, variables) => result?,
        };
        Ok(MutationResponse { request_id, data })
    }
}
