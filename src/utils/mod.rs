//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `mqgate` application.
//!
//! This module centralizes reusable components, such as the error taxonomy and
//! logging initialisation, to keep the rest of the crate consistent.

pub mod error;
pub mod logging;
