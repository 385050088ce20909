//! Platform Abstraction Layer (PAL). Everything that touches the operating system or executes
//! processor identification instructions lives behind the `Platform` trait defined here.

mod abstractions;
pub(crate) use abstractions::*;

mod cpuid;

mod facade;
pub(crate) use facade::*;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::*;

#[cfg(not(any(target_os = "linux", windows)))]
compile_error!("core_aware_launcher supports only Windows and Linux");
