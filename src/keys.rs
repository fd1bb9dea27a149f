//! Verification-key cache with background refresh and on-demand rotation handling.

pub mod set;
pub mod store;

pub use set::{KeySet, VerificationKey};
pub use store::{KeyStore, KeyStoreOptions, KeyStoreStatus, RefreshTrigger};
