use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::data_connect::{DataConnectResult, DataConnectTransport, OperationResult, Struct};
use crate::test_support::gate::CallGate;

#[derive(Clone, Debug, PartialEq)]
pub struct TransportCall {
    pub mutation: bool,
    pub request_id: String,
    pub operation_name: String,
    pub variables: Struct,
}

type Responder =
    Arc<dyn Fn(&TransportCall, usize) -> DataConnectResult<OperationResult> + Send + Sync>;

/// Transport double that records every call and answers through a configurable responder.
///
/// By default the n-th call (1-based) answers `{"operation": <name>, "call": n}`.
pub struct ScriptedTransport {
    calls: Mutex<Vec<TransportCall>>,
    responder: Mutex<Responder>,
    gate: CallGate,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Mutex::new(Arc::new(|call: &TransportCall, index: usize| {
                Ok(OperationResult::from_data(json!({
                    "operation": call.operation_name,
                    "call": index,
                })))
            })),
            gate: CallGate::new(),
        }
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&TransportCall, usize) -> DataConnectResult<OperationResult> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn pause(&self) {
        self.gate.pause();
    }

    pub fn resume(&self) {
        self.gate.resume();
    }

    pub async fn wait_for_calls(&self, count: usize) {
        self.gate.wait_for_calls(count).await;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn invoke(
        &self,
        mutation: bool,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult> {
        let call = TransportCall {
            mutation,
            request_id: request_id.to_string(),
            operation_name: operation_name.to_string(),
            variables: variables.clone(),
        };
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call.clone());
            calls.len()
        };
        self.gate.enter().await;
        let responder = self.responder.lock().unwrap().clone();
        responder(&call, index)
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataConnectTransport for ScriptedTransport {
    async fn execute_query(
        &self,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult> {
        self.invoke(false, request_id, operation_name, variables).await
    }

    async fn execute_mutation(
        &self,
        request_id: &str,
        operation_name: &str,
        variables: &Struct,
    ) -> DataConnectResult<OperationResult> {
        self.invoke(true, request_id, operation_name, variables).await
    }
}
