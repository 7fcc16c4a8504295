//! Query description: filters, sort keys, ranges and capability sets.
//!
//! # Responsibility
//! - Describe a set of records independently of any storage backend.
//! - Provide the in-memory interpreter used when a backend cannot apply part
//!   of a query natively.

pub mod capability;
pub mod filter;
pub mod sort;
