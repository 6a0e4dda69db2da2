//! Request lifecycle state.
//!
//! The lifecycle store is the sole place request status may change. Its
//! conditional [`transition`](LifecycleStore::transition) is the
//! synchronization point that resolves concurrent provider accepts to a
//! single winner (at-most-one assignment).
//!
//! # Components
//!
//! - [`request`] - `ServiceRequest`, `RequestStatus`, `Urgency`, `Eta`
//! - [`store`] - `LifecycleStore`, transition errors, the terminated-entry
//!   sweeper

mod request;
mod store;

pub use request::{Eta, RequestStatus, ServiceRequest, Urgency};
pub use store::{
    spawn_terminated_sweeper, CreateError, LifecycleStore, TransitionError,
};
