// Platform trait abstraction for mocking in tests.
//
// Everything the core needs from the operating system or from the CPU identification instruction
// goes through this trait. Operations are kept at the granularity of the launch state machine so
// that tests can inject a failure at any individual step.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};

/// The four result registers of one CPU identification instruction execution.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct CpuidRegisters {
    pub(crate) eax: u32,
    pub(crate) ebx: u32,
    pub(crate) ecx: u32,
    pub(crate) edx: u32,
}

/// What to start, as handed to the platform by the launcher.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ProcessCommand {
    /// Fully resolved path of the executable image.
    pub(crate) program: PathBuf,

    /// Arguments, excluding the program itself.
    pub(crate) args: Vec<String>,

    /// The program and arguments merged into a single command line, for platforms that pass the
    /// command line as one string.
    pub(crate) command_line: String,

    /// Working directory of the child. `None` inherits ours.
    pub(crate) working_dir: Option<PathBuf>,
}

/// Operating system handles of a process created by [`Platform::create_suspended_process`].
///
/// The handles are raw values whose meaning is defined by the platform implementation. Whoever
/// receives this from the platform owns the handles and must eventually pass it to
/// [`Platform::close_handles`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ChildProcess {
    pub(crate) process_id: u32,
    pub(crate) process: isize,
    pub(crate) thread: isize,
}

/// Abstraction over the operating system and processor facilities used by the launcher.
///
/// This trait is automatically mocked by mockall in test builds, generating `MockPlatform`.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Executes the CPU identification instruction on the current processor.
    ///
    /// Returns all zeroes on architectures that have no such instruction.
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegisters;

    /// The number of logical processors the operating system reports.
    fn logical_processor_count(&self) -> u32;

    /// The raw mask of the processors the current thread is allowed to run on.
    ///
    /// Processors beyond the width of the mask are left out.
    fn current_thread_affinity(&self) -> io::Result<usize>;

    /// Restricts the current thread to the processors in the raw mask.
    fn set_current_thread_affinity(&self, mask: usize) -> io::Result<()>;

    /// Gives up the rest of the time slice so a pending migration can take place.
    fn yield_current_thread(&self);

    /// Resolves a program name or path against the executable search order.
    ///
    /// The error carries a human-readable summary of where the search looked.
    fn search_executable(&self, program: &Path) -> Result<PathBuf, (io::Error, String)>;

    /// Creates the process without letting it execute any of its own code.
    fn create_suspended_process(&self, command: &ProcessCommand) -> io::Result<ChildProcess>;

    fn set_process_affinity(&self, child: &ChildProcess, mask: usize) -> io::Result<()>;

    /// Lets a process created by `create_suspended_process()` start executing.
    fn resume_process(&self, child: &ChildProcess) -> io::Result<()>;

    /// Blocks until a resumed process runs its own executable image.
    ///
    /// Fails with the reason if the image could not be loaded. Platforms that load the image
    /// while creating the process return immediately.
    fn wait_for_image_start(&self, child: &ChildProcess) -> io::Result<()>;

    /// Forcibly ends the process. Failures are ignored, there is nothing better to do about them.
    fn terminate_process(&self, child: &ChildProcess, exit_code: u32);

    /// Blocks until the process has exited and returns its exit code.
    fn wait_for_exit(&self, child: &ChildProcess) -> io::Result<i32>;

    /// Releases the operating system handles held by `child`.
    fn close_handles(&self, child: &ChildProcess);
}
