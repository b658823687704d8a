//! # Storage Backends
//!
//! Durable implementations of [`SessionStore`](crate::SessionStore) and
//! [`FingerprintIndex`](crate::FingerprintIndex).

pub mod redb_store;

pub use redb_store::RedbStore;
