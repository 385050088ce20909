// Facade that dispatches to either the real platform or a mock in tests.

use std::io;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPlatform;
use crate::pal::{
    BUILD_TARGET_PLATFORM, BuildTargetPlatform, ChildProcess, CpuidRegisters, Platform,
    ProcessCommand,
};

/// Hide the real/mock platform choice behind a single type.
#[derive(Clone)]
pub(crate) enum PlatformFacade {
    Target(&'static BuildTargetPlatform),

    #[cfg(test)]
    Mock(Arc<MockPlatform>),
}

// Facade types are trivial pass-through layers - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl PlatformFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BUILD_TARGET_PLATFORM)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPlatform) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Platform for PlatformFacade {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegisters {
        match self {
            Self::Target(p) => p.cpuid(leaf, subleaf),
            #[cfg(test)]
            Self::Mock(p) => p.cpuid(leaf, subleaf),
        }
    }

    fn logical_processor_count(&self) -> u32 {
        match self {
            Self::Target(p) => p.logical_processor_count(),
            #[cfg(test)]
            Self::Mock(p) => p.logical_processor_count(),
        }
    }

    fn current_thread_affinity(&self) -> io::Result<usize> {
        match self {
            Self::Target(p) => p.current_thread_affinity(),
            #[cfg(test)]
            Self::Mock(p) => p.current_thread_affinity(),
        }
    }

    fn set_current_thread_affinity(&self, mask: usize) -> io::Result<()> {
        match self {
            Self::Target(p) => p.set_current_thread_affinity(mask),
            #[cfg(test)]
            Self::Mock(p) => p.set_current_thread_affinity(mask),
        }
    }

    fn yield_current_thread(&self) {
        match self {
            Self::Target(p) => p.yield_current_thread(),
            #[cfg(test)]
            Self::Mock(p) => p.yield_current_thread(),
        }
    }

    fn search_executable(&self, program: &Path) -> Result<PathBuf, (io::Error, String)> {
        match self {
            Self::Target(p) => p.search_executable(program),
            #[cfg(test)]
            Self::Mock(p) => p.search_executable(program),
        }
    }

    fn create_suspended_process(&self, command: &ProcessCommand) -> io::Result<ChildProcess> {
        match self {
            Self::Target(p) => p.create_suspended_process(command),
            #[cfg(test)]
            Self::Mock(p) => p.create_suspended_process(command),
        }
    }

    fn set_process_affinity(&self, child: &ChildProcess, mask: usize) -> io::Result<()> {
        match self {
            Self::Target(p) => p.set_process_affinity(child, mask),
            #[cfg(test)]
            Self::Mock(p) => p.set_process_affinity(child, mask),
        }
    }

    fn resume_process(&self, child: &ChildProcess) -> io::Result<()> {
        match self {
            Self::Target(p) => p.resume_process(child),
            #[cfg(test)]
            Self::Mock(p) => p.resume_process(child),
        }
    }

    fn wait_for_image_start(&self, child: &ChildProcess) -> io::Result<()> {
        match self {
            Self::Target(p) => p.wait_for_image_start(child),
            #[cfg(test)]
            Self::Mock(p) => p.wait_for_image_start(child),
        }
    }

    fn terminate_process(&self, child: &ChildProcess, exit_code: u32) {
        match self {
            Self::Target(p) => p.terminate_process(child, exit_code),
            #[cfg(test)]
            Self::Mock(p) => p.terminate_process(child, exit_code),
        }
    }

    fn wait_for_exit(&self, child: &ChildProcess) -> io::Result<i32> {
        match self {
            Self::Target(p) => p.wait_for_exit(child),
            #[cfg(test)]
            Self::Mock(p) => p.wait_for_exit(child),
        }
    }

    fn close_handles(&self, child: &ChildProcess) {
        match self {
            Self::Target(p) => p.close_handles(child),
            #[cfg(test)]
            Self::Mock(p) => p.close_handles(child),
        }
    }
}

// Debug implementations have no API contract to test.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl std::fmt::Debug for PlatformFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}

impl Default for PlatformFacade {
    fn default() -> Self {
        Self::target()
    }
}
