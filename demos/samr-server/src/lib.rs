//! In-memory SAMR account store used by the `samr-server` binary and the
//! integration tests.

pub mod store;

pub use store::{Account, Domain, SamObject, SamStore};
