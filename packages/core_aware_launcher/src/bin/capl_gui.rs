#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
// Launching from a shortcut must not flash a console window.
#![cfg_attr(windows, windows_subsystem = "windows")]

//! Windowed entry point of the launcher, presenting results as message boxes.
//!
//! On operating systems without message boxes this behaves like the console entry point.

use std::env;
use std::process::ExitCode;

#[cfg(not(windows))]
use core_aware_launcher::ConsoleReporter as PlatformReporter;
#[cfg(windows)]
use core_aware_launcher::DialogReporter as PlatformReporter;
use core_aware_launcher::run;

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let env_args: Vec<String> = env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let str_args: Vec<&str> = env_args.iter().map(String::as_str).collect();

    run(
        "capl-gui",
        str_args.get(1..).unwrap_or(&[]),
        &PlatformReporter::new(),
    )
}
