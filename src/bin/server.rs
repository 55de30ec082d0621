//! forkline HTTP server.
//! Run with: cargo run --bin forkline-server

use std::process::ExitCode;

use forkline::start_forkline;

fn main() -> ExitCode {
    start_forkline::run()
}
