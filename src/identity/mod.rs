//! Host identities, authentication requests and the session store.

mod host;
mod request;
mod request_context;
mod session;

pub use host::{HostId, HostIdentity};
pub use request::{AuthenticationRequest, ExternalCredentials};
pub use request_context::CallerContext;
pub use session::{token_hint, Lookup, Session, SessionStore, SessionToken};
