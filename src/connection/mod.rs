//! Connection lifecycle management.
//!
//! One pairing flow at a time: the [`SingleFlight`] guard serializes
//! requests, the [`LifecycleManager`] drives the state machine from the
//! protocol client's event stream, and [`ReconnectPolicy`] bounds retries
//! after transient disconnects.

mod code;
mod guard;
mod lifecycle;
mod retry;

pub use code::{format_pairing_code, normalize_phone_number};
pub use guard::{FlightPermit, SingleFlight};
pub use lifecycle::{
    FlowOptions, FlowReply, FlowRequest, FlowResponder, LifecycleManager, LifecycleState,
};
pub use retry::ReconnectPolicy;
