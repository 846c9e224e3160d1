pub mod builder;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod performance;
pub mod protocol;
pub mod scope;
pub mod transport;

pub use client::Client;
pub use config::{ClientOptions, Dsn};
pub use error::{FaultlineError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::client::Client;
    pub use crate::config::ClientOptions;
    pub use crate::error::{FaultlineError, Result};
    pub use crate::performance::{SpanHandle, TransactionContext, TransactionHandle, TransactionOrSpan};
    pub use crate::protocol::{Breadcrumb, EventId, Level, Map, SpanStatus, User};
    pub use crate::scope::Scope;
}
