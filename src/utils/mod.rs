//! Utilities Module
//!
//! This module contains shared utility functionality for netcmd.

pub mod error;
pub mod tracing;
