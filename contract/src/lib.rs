//! Wire contract shared by the gateway and the dashboard.
//!
//! Both sides agree on three things: the uniform [`Envelope`] the gateway
//! answers with, the static registry of the ten upstream report endpoints,
//! and the [`Clock`] used for every expiry / freshness decision.

pub mod clock;
pub mod endpoints;
pub mod envelope;

pub use clock::{Clock, ManualClock, SystemClock};
pub use endpoints::{EndpointDescriptor, ENDPOINTS};
pub use envelope::Envelope;
