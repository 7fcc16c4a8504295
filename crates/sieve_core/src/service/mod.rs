//! Record lifecycle, collections and relationship navigation.
//!
//! # Responsibility
//! - Bind repository, identity map, events and consistency checks into one
//!   explicit session scope.
//! - Keep callers independent of which repository backs the session.

pub mod collection;
pub mod navigation;
pub mod session;
