use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::platform::token::{IdTokenListener, InternalAuthProvider, TokenError};
use crate::test_support::gate::CallGate;

/// In-memory auth provider issuing `token1`, `token2`, ... (suffixed `-forced` for forced
/// refreshes), one per call.
pub struct FakeAuthProvider {
    state: Mutex<FakeAuthState>,
    gate: CallGate,
}

#[derive(Default)]
struct FakeAuthState {
    uid: Option<String>,
    listeners: Vec<IdTokenListener>,
    calls: Vec<bool>,
    error: Option<TokenError>,
    add_listener_error: Option<TokenError>,
    remove_listener_error: Option<TokenError>,
}

impl FakeAuthProvider {
    pub fn signed_in(uid: &str) -> Self {
        Self {
            state: Mutex::new(FakeAuthState {
                uid: Some(uid.to_string()),
                ..Default::default()
            }),
            gate: CallGate::new(),
        }
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

    /// `force_refresh` flags of every `get_access_token` call so far.
    pub fn calls(&self) -> Vec<bool> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().unwrap().listeners.len()
    }

    pub fn fail_with(&self, error: Option<TokenError>) {
        self.state.lock().unwrap().error = error;
    }

    pub fn fail_listener_registration(&self, error: Option<TokenError>) {
        self.state.lock().unwrap().add_listener_error = error;
    }

    pub fn fail_listener_removal(&self, error: Option<TokenError>) {
        self.state.lock().unwrap().remove_listener_error = error;
    }

    pub fn sign_in(&self, uid: &str) {
        self.state.lock().unwrap().uid = Some(uid.to_string());
        self.notify();
    }

    pub fn sign_out(&self) {
        self.state.lock().unwrap().uid = None;
        self.notify();
    }

    pub fn rotate_token(&self) {
        self.notify();
    }

    fn notify(&self) {
        let listeners = self.state.lock().unwrap().listeners.clone();
        for listener in listeners {
            listener();
        }
    }
}

#[async_trait]
impl InternalAuthProvider for FakeAuthProvider {
    async fn get_access_token(&self, force_refresh: bool) -> Result<Option<String>, TokenError> {
        let index = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(force_refresh);
            state.calls.len()
        };
        self.gate.enter().await;
        if let Some(error) = self.state.lock().unwrap().error.clone() {
            return Err(error);
        }
        let suffix = if force_refresh { "-forced" } else { "" };
        Ok(Some(format!("token{index}{suffix}")))
    }

    fn uid(&self) -> Option<String> {
        self.state.lock().unwrap().uid.clone()
    }

    fn add_id_token_listener(&self, listener: IdTokenListener) -> Result<(), TokenError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.add_listener_error.clone() {
            return Err(error);
        }
        state.listeners.push(listener);
        Ok(())
    }

    fn remove_id_token_listener(&self, listener: &IdTokenListener) -> Result<(), TokenError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.remove_listener_error.clone() {
            return Err(error);
        }
        state
            .listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));
        Ok(())
    }
}
