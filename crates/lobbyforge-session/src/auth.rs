//! Authentication hook for validating user identity.
//!
//! Lobbyforge doesn't issue tokens; the host application does. The
//! [`Authenticator`] trait is the single async method the connection
//! handler calls with whatever token the client presented (`token=`
//! query parameter or `Authorization: Bearer` header).

use lobbyforge_protocol::UserId;

use crate::SessionError;

/// Who a connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

/// Validates a client's auth token and returns their identity.
///
/// # Example
///
/// ```rust
/// use lobbyforge_protocol::UserId;
/// use lobbyforge_session::{Authenticator, SessionError, UserIdentity};
///
/// /// Accepts `"<id>:<name>"` tokens. Development only.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(
///         &self,
///         token: &str,
///     ) -> Result<UserIdentity, SessionError> {
///         let (id, name) = token.split_once(':').ok_or_else(|| {
///             SessionError::AuthFailed("expected <id>:<name>".into())
///         })?;
///         let id: u64 = id.parse().map_err(|_| {
///             SessionError::AuthFailed("id must be a number".into())
///         })?;
///         Ok(UserIdentity::new(UserId(id), name))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given token and returns the caller's identity.
    ///
    /// # Returns
    /// - `Ok(UserIdentity)`: authentication succeeded
    /// - `Err(SessionError::AuthFailed)`: token is invalid or expired
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<UserIdentity, SessionError>> + Send;
}
