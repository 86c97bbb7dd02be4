//! Tablefare Core - Shared types library.
//!
//! This crate provides common types used across all Tablefare components:
//! - `client` - Session, cart, and checkout reconciliation core
//! - the UI shell crates that consume it
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, money, emails, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
