//! The main entrypoint for the device repair CLI

use anyhow::Result;

fn run() -> Result<()> {
    devrepair_utils::initialize_tracing();
    tracing::trace!("starting {}", env!("CARGO_PKG_NAME"));
    devrepair_lib::cli::run_from_iter(std::env::args())
}

fn main() {
    // In order to print the error in a custom format (with :#) our
    // main simply invokes a run() where all the work is done.
    // This code just captures any errors.
    if let Err(e) = run() {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}
