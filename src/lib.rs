#![doc = include_str!("../README.md")]

pub mod auth;
pub mod claims;
pub mod config;
pub mod error;
pub mod listener;
pub mod pipeline;
pub mod request;
pub mod session;
pub mod storage;
pub mod types;

// Re-exports for convenient access
pub use auth::AuthClient;
pub use claims::{Claims, decode_claims};
pub use config::ClientConfig;
pub use error::Error;
pub use listener::{LogoutReason, NoopListener, SessionListener};
pub use pipeline::AuthenticatedRequestPipeline;
pub use request::OutgoingRequest;
pub use session::{REFRESH_TOKEN_KEY, SESSION_KEYS, Session, TOKEN_KEY, USER_KEY};
#[cfg(feature = "fs")]
pub use storage::FileStorage;
pub use storage::{MemoryStorage, SessionStorage, StorageError};
pub use types::{LoginResponse, Profile, RefreshResponse, UserId};
