//! # Kiln Support
//!
//! Shared utilities for the Kiln lifecycle engine.
//!
//! This crate provides:
//! - Text rendering for error messages and teardown reports
//! - Type-name heuristics used for "did you mean?" suggestions

pub mod rendering;
