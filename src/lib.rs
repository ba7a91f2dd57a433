//! Keel: typed relational client engine.
//!
//! Entities describe their mapping with [`EntityMetadata`], commands compile
//! typed or text filters into parameterized SQL through a driver's
//! [`SqlWriter`] and run on connections handed out by a [`Database`], shared
//! inside a [`TransactionScope`].
pub use keel_core::*;
