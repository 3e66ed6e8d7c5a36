use keyring::Entry;
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

const KEYRING_SERVICE: &str = "listen-sync";
const TOKEN_ENTRY: &str = "session_token";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Bearer token for the sync backend. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Result<Self, CredentialError> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(CredentialError::Validation(
                "Bearer token cannot be empty".to_string(),
            ));
        }
        if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(CredentialError::Validation(
                "Bearer token contains whitespace or control characters".to_string(),
            ));
        }
        Ok(BearerToken(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken(<{} chars>)", self.0.len())
    }
}

/// The user the host application has signed in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Everything needed to open a sync connection: a token and a signed-in user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub token: BearerToken,
    pub user: AuthenticatedUser,
}

impl Credential {
    pub fn new(token: BearerToken, user: AuthenticatedUser) -> Self {
        Self { token, user }
    }
}

/// Host session as observed by the sync client
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<BearerToken>,
    pub user: Option<AuthenticatedUser>,
}

impl Session {
    /// A credential exists only when both the token and the user are present
    pub fn credential(&self) -> Option<Credential> {
        match (&self.token, &self.user) {
            (Some(token), Some(user)) => Some(Credential::new(token.clone(), user.clone())),
            _ => None,
        }
    }
}

/// Trait for token storage backends
pub trait TokenStore: Send + Sync {
    fn load_token(&self) -> Result<Option<BearerToken>, CredentialError>;
    fn store_token(&self, token: &BearerToken) -> Result<(), CredentialError>;
    fn clear_token(&self) -> Result<(), CredentialError>;
}

/// Production token storage using the system keyring
pub struct KeyringTokenStore {
    entry: Entry,
}

impl KeyringTokenStore {
    pub fn new() -> Result<Self, CredentialError> {
        let entry = Entry::new(KEYRING_SERVICE, TOKEN_ENTRY)?;
        Ok(Self { entry })
    }
}

impl TokenStore for KeyringTokenStore {
    fn load_token(&self) -> Result<Option<BearerToken>, CredentialError> {
        match self.entry.get_password() {
            Ok(token) => {
                info!("Credentials: Loaded session token from keyring");
                BearerToken::new(token).map(Some)
            }
            Err(keyring::Error::NoEntry) => {
                info!("Credentials: No session token found");
                Ok(None)
            }
            Err(e) => Err(CredentialError::Keyring(e)),
        }
    }

    fn store_token(&self, token: &BearerToken) -> Result<(), CredentialError> {
        self.entry.set_password(token.as_str())?;
        info!("Credentials: Session token stored in keyring");
        Ok(())
    }

    fn clear_token(&self) -> Result<(), CredentialError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Keyring(e)),
        }
    }
}

/// In-memory token storage for testing
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct InMemoryTokenStore {
    token: std::sync::Mutex<Option<BearerToken>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl TokenStore for InMemoryTokenStore {
    fn load_token(&self) -> Result<Option<BearerToken>, CredentialError> {
        Ok(self.token.lock().unwrap().clone())
    }

    fn store_token(&self, token: &BearerToken) -> Result<(), CredentialError> {
        *self.token.lock().unwrap() = Some(token.clone());
        Ok(())
    }

    fn clear_token(&self) -> Result<(), CredentialError> {
        *self.token.lock().unwrap() = None;
        Ok(())
    }
}

/// Host-side handle publishing session changes to the sync client
#[derive(Clone)]
pub struct SessionHandle {
    tx: watch::Sender<Session>,
}

impl SessionHandle {
    /// Create a handle whose token is seeded from persistent storage
    pub fn from_store(store: &dyn TokenStore) -> Self {
        let token = match store.load_token() {
            Ok(token) => token,
            Err(e) => {
                warn!("Credentials: Failed to load session token: {}", e);
                None
            }
        };
        Self::new(Session { token, user: None })
    }

    pub fn new(initial: Session) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn login(&self, user: AuthenticatedUser) {
        self.tx.send_modify(|session| session.user = Some(user));
    }

    pub fn logout(&self) {
        self.tx.send_modify(|session| session.user = None);
    }

    pub fn set_token(&self, token: BearerToken) {
        self.tx.send_modify(|session| session.token = Some(token));
    }

    pub fn clear_token(&self) {
        self.tx.send_modify(|session| session.token = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "u-1".to_string(),
        }
    }

    #[test]
    fn test_credential_requires_token_and_user() {
        let token = BearerToken::new("abc123").unwrap();

        assert!(Session::default().credential().is_none());
        assert!(Session {
            token: Some(token.clone()),
            user: None
        }
        .credential()
        .is_none());
        assert!(Session {
            token: None,
            user: Some(user())
        }
        .credential()
        .is_none());

        let credential = Session {
            token: Some(token.clone()),
            user: Some(user()),
        }
        .credential()
        .unwrap();
        assert_eq!(credential.token, token);
    }

    #[test]
    fn test_token_validation_and_redaction() {
        assert!(BearerToken::new("   ").is_err());
        assert!(BearerToken::new("abc def").is_err());

        let token = BearerToken::new(" secret-token ").unwrap();
        assert_eq!(token.as_str(), "secret-token");
        assert!(!format!("{:?}", token).contains("secret"));
    }

    #[test]
    fn test_session_handle_seeds_from_store() {
        let store = InMemoryTokenStore::default();
        store
            .store_token(&BearerToken::new("stored").unwrap())
            .unwrap();

        let handle = SessionHandle::from_store(&store);
        let rx = handle.subscribe();
        assert_eq!(rx.borrow().token.as_ref().unwrap().as_str(), "stored");
        assert!(rx.borrow().credential().is_none());

        handle.login(user());
        assert!(handle.current().credential().is_some());

        handle.logout();
        assert!(handle.current().credential().is_none());

        store.clear_token().unwrap();
        assert!(store.load_token().unwrap().is_none());
    }
}
