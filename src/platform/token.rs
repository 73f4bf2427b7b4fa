use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// Broad classification of token acquisition failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenErrorKind {
    /// The provider has no signed-in user; callers treat this as "no token".
    NoSignedInUser,
    /// The owning app was deleted while the call was outstanding.
    AppDeleted,
    /// Any other failure reported by the provider.
    Failed,
}

/// Error type returned by auth providers when token acquisition or listener
/// registration fails.
#[derive(Debug, Clone)]
pub struct TokenError {
    kind: TokenErrorKind,
    message: String,
}

impl TokenError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(TokenErrorKind::Failed, message)
    }

    pub fn with_kind(kind: TokenErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_signed_in_user() -> Self {
        Self::with_kind(TokenErrorKind::NoSignedInUser, "no user is signed in")
    }

    pub fn app_deleted() -> Self {
        Self::with_kind(TokenErrorKind::AppDeleted, "the Firebase app was deleted")
    }

    pub fn from_error(err: impl Error) -> Self {
        Self::new(err.to_string())
    }

    pub fn kind(&self) -> TokenErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for TokenError {}

/// Callback invoked whenever the provider observes a sign-in, sign-out or token rotation.
pub type IdTokenListener = Arc<dyn Fn() + Send + Sync + 'static>;

/// Interop surface of the platform auth module consumed by Data Connect.
#[async_trait]
pub trait InternalAuthProvider: Send + Sync {
    /// Returns the current access token, forcing a round-trip to the token service when
    /// `force_refresh` is set.
    async fn get_access_token(&self, force_refresh: bool) -> Result<Option<String>, TokenError>;

    /// Uid of the signed-in user, if any.
    fn uid(&self) -> Option<String>;

    fn add_id_token_listener(&self, listener: IdTokenListener) -> Result<(), TokenError>;

    /// Removes a listener previously passed to `add_id_token_listener`, matched by pointer.
    fn remove_id_token_listener(&self, listener: &IdTokenListener) -> Result<(), TokenError>;
}
