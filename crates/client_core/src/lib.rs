//! Client side of a dataset cleaning session: the session state machine, the
//! service contract it talks to, and an HTTP implementation of that contract.

pub mod error;
pub mod events;
pub mod service;
pub mod session;
pub mod transport;

pub use error::{ServiceError, SessionError, SessionPhase};
pub use events::{drive_observer, NoticeKind, SessionEvent, SessionObserver};
pub use service::DatasetService;
pub use session::SessionClient;
pub use transport::{HttpDatasetService, DEFAULT_REQUEST_TIMEOUT};

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod transport_tests;
