//! Data model shared by the builder, span tracker and transports.
//!
//! - **Event**: an error or message with the scope snapshot taken at capture time
//! - **Transaction / SpanRecord**: finished performance intervals
//! - **Envelope**: the unit handed to a transport

pub mod envelope;
pub mod event;
pub mod models;
pub mod transaction;

pub use envelope::{Envelope, EnvelopeItem};
pub use event::{Event, EventId};
pub use models::{
    Breadcrumb, ExceptionValue, Frame, Level, Map, RequestInfo, Stacktrace, TraceContext, User,
};
pub use transaction::{SpanRecord, SpanStatus, Transaction};
