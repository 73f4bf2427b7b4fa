//! Access-token management for outgoing Data Connect requests.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::data_connect::error::{
    auth_error, cancelled_error, closed_error, DataConnectResult,
};
use crate::platform::deferred::Deferred;
use crate::platform::token::{IdTokenListener, InternalAuthProvider, TokenErrorKind};

/// Receives the uid of the signed-in user (or `None`) on every token change.
pub type AuthChangeListener = Arc<dyn Fn(Option<String>) + Send + Sync + 'static>;

/// Produces the auth token attached to each request.
///
/// The underlying provider may become available at any time (or never). Every token change
/// reported by the provider bumps a counter; a token fetch that completes after the counter
/// moved is discarded and retried, since it may belong to a different user.
#[derive(Clone)]
pub struct DataConnectAuth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    state: Mutex<AuthState>,
    close_token: CancellationToken,
}

struct AuthState {
    provider: Option<Arc<dyn InternalAuthProvider>>,
    id_token_listener: Option<IdTokenListener>,
    change_listener: Option<AuthChangeListener>,
    token_counter: u64,
    force_refresh: bool,
    closed: bool,
}

impl DataConnectAuth {
    /// Creates a token manager that picks up the auth provider once it becomes available.
    pub fn new(deferred_provider: &Deferred<dyn InternalAuthProvider>) -> Self {
        let inner = Arc::new(AuthInner {
            state: Mutex::new(AuthState {
                provider: None,
                id_token_listener: None,
                change_listener: None,
                token_counter: 0,
                force_refresh: false,
                closed: false,
            }),
            close_token: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&inner);
        deferred_provider.when_available(move |provider| {
            if let Some(inner) = weak.upgrade() {
                inner.on_provider_available(provider);
            }
        });

        Self { inner }
    }

    /// A token manager without an auth provider; every request is sent unauthenticated.
    pub fn unavailable() -> Self {
        Self::new(&Deferred::new())
    }

    /// Returns the current access token, or `None` when no provider or no signed-in user
    /// is available.
    pub async fn get_access_token(&self, request_id: &str) -> DataConnectResult<Option<String>> {
        loop {
            let (provider, force_refresh, saved_counter) = {
                let mut state = self.inner.lock_state();
                if state.closed {
                    return Err(closed_error("DataConnectAuth has been closed"));
                }
                let Some(provider) = state.provider.clone() else {
                    log::debug!("[rid={request_id}] auth provider not available; sending no token");
                    return Ok(None);
                };
                let force_refresh = std::mem::take(&mut state.force_refresh);
                (provider, force_refresh, state.token_counter)
            };

            log::debug!("[rid={request_id}] getting access token (force_refresh={force_refresh})");
            let result = tokio::select! {
                biased;
                _ = self.inner.close_token.cancelled() => {
                    return Err(cancelled_error("getAccessToken() cancelled by close()"));
                }
                result = provider.get_access_token(force_refresh) => result,
            };

            {
                let state = self.inner.lock_state();
                if state.closed {
                    return Err(cancelled_error("getAccessToken() cancelled by close()"));
                }
                if state.token_counter != saved_counter {
                    log::debug!(
                        "[rid={request_id}] token changed while the request was outstanding; retrying"
                    );
                    continue;
                }
            }

            return match result {
                Ok(token) => Ok(token),
                Err(err) if err.kind() == TokenErrorKind::NoSignedInUser => {
                    log::debug!("[rid={request_id}] no signed-in user; sending no token");
                    Ok(None)
                }
                Err(err) => {
                    log::warn!("[rid={request_id}] getAccessToken() failed: {err}");
                    Err(auth_error(format!("getAccessToken() failed: {err}")))
                }
            };
        }
    }

    /// Makes the next provider call bypass any cached token.
    pub fn force_refresh(&self) {
        self.inner.lock_state().force_refresh = true;
    }

    /// Uid of the signed-in user, when the provider is available.
    pub fn uid(&self) -> Option<String> {
        let provider = self.inner.lock_state().provider.clone();
        provider.and_then(|provider| provider.uid())
    }

    /// Installs the listener and immediately reports the current uid to it.
    pub fn set_change_listener(&self, listener: AuthChangeListener) {
        let provider = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.change_listener = Some(listener.clone());
            state.provider.clone()
        };
        listener(provider.and_then(|provider| provider.uid()));
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Cancels in-flight token requests and detaches from the provider. Idempotent.
    pub fn close(&self) {
        let (provider, listener) = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.change_listener = None;
            (state.provider.take(), state.id_token_listener.take())
        };

        self.inner.close_token.cancel();

        if let (Some(provider), Some(listener)) = (provider, listener) {
            remove_listener(provider.as_ref(), &listener);
        }
    }
}

impl AuthInner {
    fn lock_state(&self) -> MutexGuard<'_, AuthState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_provider_available(self: &Arc<Self>, provider: Arc<dyn InternalAuthProvider>) {
        let change_listener = {
            let mut state = self.lock_state();
            if state.closed {
                log::debug!("auth provider became available after close(); ignoring it");
                return;
            }
            state.provider = Some(provider.clone());
            state.token_counter += 1;
            state.change_listener.clone()
        };
        if let Some(change_listener) = change_listener {
            change_listener(provider.uid());
        }

        let weak = Arc::downgrade(self);
        let listener: IdTokenListener = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_id_token_changed();
            }
        });

        match provider.add_id_token_listener(listener.clone()) {
            Ok(()) => {
                let closed_meanwhile = {
                    let mut state = self.lock_state();
                    if state.closed {
                        true
                    } else {
                        state.id_token_listener = Some(listener.clone());
                        false
                    }
                };
                if closed_meanwhile {
                    remove_listener(provider.as_ref(), &listener);
                }
            }
            Err(err) => {
                if err.kind() == TokenErrorKind::AppDeleted {
                    log::debug!("ignoring addIdTokenListener() failure for deleted app: {err}");
                } else {
                    log::warn!("addIdTokenListener() failed; auth treated as unavailable: {err}");
                }
                self.lock_state().provider = None;
            }
        }
    }

    fn on_id_token_changed(&self) {
        let (change_listener, provider) = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.token_counter += 1;
            (state.change_listener.clone(), state.provider.clone())
        };
        if let Some(change_listener) = change_listener {
            change_listener(provider.and_then(|provider| provider.uid()));
        }
    }
}

fn remove_listener(provider: &dyn InternalAuthProvider, listener: &IdTokenListener) {
    if let Err(err) = provider.remove_id_token_listener(listener) {
        if err.kind() == TokenErrorKind::AppDeleted {
            log::debug!("ignoring removeIdTokenListener() failure for deleted app: {err}");
        } else {
            log::warn!("removeIdTokenListener() failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_connect::error::DataConnectErrorCode;
    use crate::platform::token::TokenError;
    use crate::test_support::FakeAuthProvider;

    fn auth_with(provider: &Arc<FakeAuthProvider>) -> DataConnectAuth {
        let deferred: Deferred<dyn InternalAuthProvider> = Deferred::new();
        deferred.provide(provider.clone());
        DataConnectAuth::new(&deferred)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn returns_none_without_provider() {
        let auth = DataConnectAuth::unavailable();
        assert_eq!(auth.get_access_token("rid").await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn picks_up_provider_that_arrives_later() {
        let deferred: Deferred<dyn InternalAuthProvider> = Deferred::new();
        let auth = DataConnectAuth::new(&deferred);
        assert_eq!(auth.get_access_token("rid").await.unwrap(), None);

        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        deferred.provide(provider.clone());
        assert_eq!(
            auth.get_access_token("rid").await.unwrap().as_deref(),
            Some("token1")
        );
        assert_eq!(provider.listener_count(), 1);
        assert_eq!(auth.uid().as_deref(), Some("alice"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_signed_in_user_yields_none() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        provider.fail_with(Some(TokenError::no_signed_in_user()));
        let auth = auth_with(&provider);
        assert_eq!(auth.get_access_token("rid").await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn provider_failures_propagate() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        provider.fail_with(Some(TokenError::new("token service unreachable")));
        let auth = auth_with(&provider);
        let err = auth.get_access_token("rid").await.unwrap_err();
        assert_eq!(err.code, DataConnectErrorCode::Auth);
        assert!(err.message().contains("token service unreachable"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn force_refresh_applies_to_exactly_one_call() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        let auth = auth_with(&provider);

        auth.force_refresh();
        assert_eq!(
            auth.get_access_token("rid").await.unwrap().as_deref(),
            Some("token1-forced")
        );
        auth.get_access_token("rid").await.unwrap();
        auth.get_access_token("rid").await.unwrap();
        assert_eq!(provider.calls(), vec![true, false, false]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stale_token_is_discarded_and_retried() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        let auth = auth_with(&provider);
        provider.pause();

        let task = tokio::spawn({
            let auth = auth.clone();
            async move { auth.get_access_token("rid").await }
        });
        provider.wait_for_calls(1).await;
        provider.sign_in("bob");
        provider.resume();

        assert_eq!(task.await.unwrap().unwrap().as_deref(), Some("token2"));
        assert_eq!(provider.calls(), vec![false, false]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn force_refresh_racing_with_stale_fetch_is_honoured_on_retry() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        let auth = auth_with(&provider);
        provider.pause();

        let task = tokio::spawn({
            let auth = auth.clone();
            async move { auth.get_access_token("rid").await }
        });
        provider.wait_for_calls(1).await;
        auth.force_refresh();
        provider.rotate_token();
        provider.resume();

        assert_eq!(
            task.await.unwrap().unwrap().as_deref(),
            Some("token2-forced")
        );
        assert_eq!(provider.calls(), vec![false, true]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_receive_provider_tokens() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        let auth = auth_with(&provider);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let auth = auth.clone();
                tokio::spawn(async move { auth.get_access_token(&format!("rid{i}")).await })
            })
            .collect();

        let mut tokens = Vec::new();
        for task in tasks {
            tokens.push(task.await.unwrap().unwrap().unwrap());
        }
        let issued: Vec<String> = (1..=provider.calls().len())
            .map(|n| format!("token{n}"))
            .collect();
        for token in tokens {
            assert!(issued.contains(&token), "unexpected token {token}");
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_cancels_in_flight_requests_and_rejects_new_ones() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        let auth = auth_with(&provider);
        provider.pause();

        let task = tokio::spawn({
            let auth = auth.clone();
            async move { auth.get_access_token("rid").await }
        });
        provider.wait_for_calls(1).await;

        let closers: Vec<_> = (0..3)
            .map(|_| {
                let auth = auth.clone();
                tokio::spawn(async move { auth.close() })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.code, DataConnectErrorCode::Cancelled);
        assert!(err.message().contains("cancelled by close()"));

        let err = auth.get_access_token("rid").await.unwrap_err();
        assert_eq!(err.code, DataConnectErrorCode::Closed);
        assert_eq!(provider.listener_count(), 0);
        assert!(auth.is_closed());
        provider.resume();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn listener_registration_failure_leaves_auth_unavailable() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        provider.fail_listener_registration(Some(TokenError::new("boom")));
        let auth = auth_with(&provider);
        assert_eq!(auth.get_access_token("rid").await.unwrap(), None);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn app_deleted_during_close_is_ignored() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        let auth = auth_with(&provider);
        provider.fail_listener_removal(Some(TokenError::app_deleted()));
        auth.close();
        assert!(auth.is_closed());
    }

    #[test]
    fn change_listener_observes_sign_in_and_out() {
        let provider = Arc::new(FakeAuthProvider::signed_in("alice"));
        let auth = auth_with(&provider);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        auth.set_change_listener(Arc::new(move |uid: Option<String>| {
            captured.lock().unwrap().push(uid);
        }));
        provider.sign_in("bob");
        provider.sign_out();

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Some("alice".to_string()), Some("bob".to_string()), None]
        );
    }
}
