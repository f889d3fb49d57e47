//
// main.rs
// dicom-deid
//
// Binary entry point; all argument parsing and dispatch lives in the CLI module.
//
// dicom-deid contributors - October 2026

use dicom_deid::cli;

fn main() -> anyhow::Result<()> {
    cli::run()
}
