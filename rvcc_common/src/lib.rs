//! Shared error types for the rvcc compiler core.
//!
//! This crate is deliberately small: the core assumes lexing, parsing, semantic
//! checking, and diagnostic presentation all live upstream of it, so the only thing
//! shared across the IR, optimizer, and backend crates is the error type they
//! propagate on internal failure.

pub mod error;

pub use error::*;
