//! Provider records and radius queries.
//!
//! # Components
//!
//! - [`snapshot`] - `ProviderSnapshot` projection, `ServiceCategory`,
//!   public-info subset, user contact
//! - [`store`] - `ProfileStore` collaborator boundary and the in-memory
//!   implementation used by tests and the CLI gateway
//! - [`directory`] - `ProviderDirectory` read-through radius queries with
//!   online/effective-distance ranking

mod directory;
mod snapshot;
mod store;

pub use directory::{Candidate, ProviderDirectory};
pub use snapshot::{
    ProviderPublicInfo, ProviderSnapshot, ServiceCategory, UnknownCategory, UserContact,
};
pub use store::{MemoryProfileStore, ProfileStore, StoreError};
