// Playback-position synchronization client

pub mod config;
pub mod credentials;
pub mod playback;
pub mod protocol;
pub mod sync;
pub mod transport;

pub use config::{Config, ResumeRearm};
pub use credentials::{AuthenticatedUser, BearerToken, Credential, Session, SessionHandle};
pub use sync::{ConnectionManager, ConnectionStatus, SyncHandle, SyncService};

// Test support (only available in unit tests or with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
