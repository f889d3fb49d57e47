//
// lib.rs
// dicom-deid
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// dicom-deid contributors - October 2026

pub mod anonymize;
pub mod batch;
pub mod checkpoint;
pub mod cli;
pub mod codec;
pub mod consistency;
pub mod dicom_access;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod guard;
pub mod models;
pub mod randomizer;
pub mod scu;
pub mod transfer;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{DeidError, Result};
