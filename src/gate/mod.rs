//! Gate core: credential check, lockout accounting, session tokens and the
//! security audit trail.

pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod lockout;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GateConfig, GateKeys, GateState, GateStateBuilder};
pub use credential::{CredentialError, CredentialVerifier};
pub use error::{GateError, GateResponse, ValidationIssue};
pub use events::{
    EventSink, MemorySink, SecurityEvent, SecurityEventLog, SecurityEventType, TracingSink,
};
pub use lockout::{AttemptLimiter, AttemptOutcome, LockoutPolicy, LockoutTracker};
pub use session::{SessionError, SessionIssuer, SessionStatus};
