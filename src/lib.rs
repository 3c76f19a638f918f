pub mod error;
pub mod config;
pub mod policy;
pub mod identity;
pub mod auth;
pub mod container;
pub mod manager;

pub use auth::{AuthenticationResult, TrustLevel};
pub use config::GateConfig;
pub use error::{GateError, GateResult};
pub use identity::{AuthenticationRequest, CallerContext, ExternalCredentials, HostIdentity};
pub use manager::{GateStatus, HostGate, HostGateBuilder, MaintenanceReport, SessionValidation};

// Test-only printing helper: expands to eprintln! in test and debug builds and is absent otherwise.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
