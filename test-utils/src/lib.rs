//! Shared test utilities for rpc-common.
//!
//! This crate provides:
//! - Proptest generators for status codes, Connect codes, tokens and methods
//! - Mock token validators and scripted handlers
//! - Test fixtures with sample claims and configs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
