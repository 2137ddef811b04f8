//! OS primitives behind the open protocol
//!
//! - `contract` - process-contract template scoped to one fork (illumos)
//! - `namespace` - resolve and enter a zone or mount namespace
//! - `fork` - fork wrapper whose child side can only terminate

pub mod contract;
pub mod fork;
pub mod namespace;

pub use self::contract::{ContractId, ContractTemplate};
pub use self::fork::Forked;
pub use self::namespace::{Entry, NamespaceHandle};
