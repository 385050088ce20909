#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Hybrid CPUs combine cores of different kinds on one die: fast performance cores, slower but
//! more frugal efficiency cores and, on some designs, a further tier of low-power efficiency cores.
//! The operating system scheduler moves threads between them as it sees fit, which is not always
//! what a latency-sensitive game or a background build job wants.
//!
//! This package launches a program so that it only ever runs on a chosen set of logical
//! processors, selected either by core kind or as an explicit list:
//!
//! 1. [`CoreClassifier`] identifies the kind of every logical processor by briefly running a probe
//!    thread on each one and asking the processor what kind of core it is executing on.
//! 1. [`AffinityResolver`] turns a [`SelectionRequest`] (e.g. "performance cores only" or "every
//!    core except 0 and 1") into a concrete [`AffinityMask`] for this machine.
//! 1. [`ConstrainedLauncher`] creates the process suspended, applies the mask, and only then lets
//!    it run, so not a single instruction of the program executes outside the selected processors.
//!
//! The `capl` and `capl-gui` binaries wrap these in a command line tool. The former reports to the
//! console, the latter via message boxes on Windows.
//!
//! # Example
//!
//! ```no_run
//! use core_aware_launcher::{
//!     AffinityResolver, ConstrainedLauncher, CoreClassifier, Selection, SelectionRequest,
//! };
//!
//! let capabilities = CoreClassifier::new().capabilities()?;
//! println!("{capabilities}");
//!
//! let mask = AffinityResolver::new(&capabilities)
//!     .resolve(&SelectionRequest::new(Selection::PerformanceOnly, false))?;
//!
//! let outcome =
//!     ConstrainedLauncher::new().launch("game.exe".as_ref(), &[], None, mask)?;
//!
//! println!("exited with code {}", outcome.exit_code());
//! # Ok::<(), core_aware_launcher::Error>(())
//! ```
//!
//! # Platform support
//!
//! Windows and Linux on x86 and x86-64. On other architectures the processor cannot be asked for
//! its core kind, so only [`Selection::AllCores`] and [`Selection::ExplicitList`] can be used.
//!
//! Only the first [`AffinityMask::WIDTH`] logical processors can be selected.

mod affinity_mask;
mod app;
mod capabilities;
mod classifier;
mod error;
mod launcher;
mod logging;
mod options;
mod pal;
mod primitive_types;
mod profile;
mod reporting;
mod selection;

pub use affinity_mask::*;
pub use app::*;
pub use capabilities::*;
pub use classifier::*;
pub use error::*;
pub use launcher::*;
pub use logging::*;
pub use options::*;
pub use primitive_types::*;
pub use profile::*;
pub use reporting::*;
pub use selection::*;
