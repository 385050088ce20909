#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Console entry point of the launcher.
//!
//! Excluded from mutation testing and coverage because all logic lives in the library, which is
//! tested directly. What remains is reading process arguments.

use std::env;
use std::process::ExitCode;

use core_aware_launcher::{ConsoleReporter, run};

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let env_args: Vec<String> = env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let str_args: Vec<&str> = env_args.iter().map(String::as_str).collect();

    run(
        "capl",
        str_args.get(1..).unwrap_or(&[]),
        &ConsoleReporter::new(),
    )
}
