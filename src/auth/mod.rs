// Authentication Module
// Session lifecycle: resume, interactive login, logout and channel binding

pub mod binder;
pub mod error;
pub mod gateway;
pub mod manager;
pub mod store;

pub use binder::{ChannelBinder, RequestChannel};
pub use error::{AuthError, LoginFailure, StoreError};
pub use gateway::{
    AuthWindow, IdentityProviderGateway, LoginOutcome, LoginRequest, PostMessageGateway,
    ProviderEndpoint, WindowOpener,
};
pub use manager::{AuthEvent, AuthState, SessionManager, SessionManagerConfig};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoredSession};
