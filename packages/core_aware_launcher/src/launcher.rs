use std::fmt;
use std::path::Path;

use scopeguard::ScopeGuard;
use tracing::{debug, info, warn};

use crate::pal::{Platform, PlatformFacade, ProcessCommand};
use crate::{AffinityMask, Error, Result};

/// Exit code given to a child that is terminated because its launch could not be completed.
const ABANDONED_EXIT_CODE: u32 = 1;

/// The steps a launch goes through, in order.
///
/// A launch that fails after `Created` never reaches `Resumed`: the child is terminated while still
/// suspended, so not a single instruction of it runs on processors outside the mask.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "the launch sequence is fixed by how suspended process creation works"
)]
pub enum LaunchState {
    /// The process exists but is suspended.
    Created,

    /// The affinity mask has been applied to the suspended process.
    AffinityApplied,

    /// The process is running.
    Resumed,

    /// The process has exited and all handles to it have been released.
    Completed,
}

/// How a completed launch ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LaunchOutcome {
    process_id: u32,
    exit_code: i32,
}

impl LaunchOutcome {
    /// The operating system identifier the launched process had.
    #[must_use]
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// The exit code of the launched process.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

type StateObserver = Box<dyn Fn(LaunchState, u32) + Send + Sync>;

/// Starts processes that are constrained to a set of logical processors from their first
/// instruction onwards.
///
/// The process is created suspended, the affinity mask is applied to it and only then is it
/// allowed to run. If any step after creation fails, the child is terminated and its handles are
/// released before the error is returned. A successful launch blocks until the child exits.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
///
/// use core_aware_launcher::{AffinityMask, ConstrainedLauncher};
///
/// let outcome = ConstrainedLauncher::new().launch(
///     Path::new("notepad"),
///     &[],
///     None,
///     AffinityMask::from_bits(0b11),
/// )?;
///
/// println!("exited with {}", outcome.exit_code());
/// # Ok::<(), core_aware_launcher::Error>(())
/// ```
pub struct ConstrainedLauncher {
    pal: PlatformFacade,
    observer: Option<StateObserver>,
}

impl ConstrainedLauncher {
    /// Creates a launcher for the current operating system.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pal: PlatformFacade::target(),
            observer: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_platform(pal: PlatformFacade) -> Self {
        Self {
            pal,
            observer: None,
        }
    }

    /// Registers a callback that is invoked with the process ID on every state transition.
    #[must_use]
    pub fn with_state_observer(
        mut self,
        observer: impl Fn(LaunchState, u32) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Launches `path` with `args`, constrained to the processors in `mask`, and waits for it to
    /// exit.
    ///
    /// `path` is resolved against the executable search order of the operating system. If
    /// `working_dir` is `None`, the child inherits the current working directory.
    ///
    /// # Errors
    ///
    /// * [`Error::SelectionEmpty`] if the mask contains no processors.
    /// * [`Error::ExecutableNotFound`] if `path` cannot be resolved.
    /// * [`Error::ProcessCreateFailed`] if the operating system refuses to create the process or
    ///   to load its executable image. In the latter case the child has been released.
    /// * [`Error::AffinityApplyFailed`], [`Error::ResumeFailed`] or [`Error::WaitFailed`] if a
    ///   later step fails. The child has been terminated and released by the time these return.
    pub fn launch(
        &self,
        path: &Path,
        args: &[String],
        working_dir: Option<&Path>,
        mask: AffinityMask,
    ) -> Result<LaunchOutcome> {
        if mask.is_empty() {
            return Err(Error::SelectionEmpty {
                base_mask: mask,
                inverted: false,
            });
        }

        info!(path = %path.display(), "attempting to launch");

        let program = self
            .pal
            .search_executable(path)
            .map_err(|(source, searched)| Error::ExecutableNotFound {
                path: path.to_path_buf(),
                searched,
                source,
            })?;

        info!(resolved = %program.display(), %mask, "launching process with affinity mask");

        let command = ProcessCommand {
            command_line: build_command_line(&program, args),
            program,
            args: args.to_vec(),
            working_dir: working_dir.map(Path::to_path_buf),
        };

        debug!(command_line = command.command_line.as_str(), "command line");

        let child = self
            .pal
            .create_suspended_process(&command)
            .map_err(|source| Error::ProcessCreateFailed {
                path: command.program.clone(),
                source,
            })?;

        let process_id = child.process_id;

        // Until the child has been waited for, leaving this function means abandoning the launch.
        let child = scopeguard::guard(child, |child| {
            warn!(process_id, "terminating process after failed launch step");
            self.pal.terminate_process(&child, ABANDONED_EXIT_CODE);
            self.pal.close_handles(&child);
        });

        self.transition(LaunchState::Created, process_id);

        self.pal
            .set_process_affinity(&child, mask.bits())
            .map_err(|source| Error::AffinityApplyFailed {
                mask,
                process_id,
                source,
            })?;

        self.transition(LaunchState::AffinityApplied, process_id);

        self.pal
            .resume_process(&child)
            .map_err(|source| Error::ResumeFailed { process_id, source })?;

        self.pal
            .wait_for_image_start(&child)
            .map_err(|source| Error::ProcessCreateFailed {
                path: command.program.clone(),
                source,
            })?;

        self.transition(LaunchState::Resumed, process_id);

        let exit_code = self
            .pal
            .wait_for_exit(&child)
            .map_err(|source| Error::WaitFailed { process_id, source })?;

        let child = ScopeGuard::into_inner(child);
        self.pal.close_handles(&child);

        self.transition(LaunchState::Completed, process_id);

        info!(process_id, exit_code, "process exited");

        Ok(LaunchOutcome {
            process_id,
            exit_code,
        })
    }

    fn transition(&self, state: LaunchState, process_id: u32) {
        debug!(?state, process_id, "launch state changed");

        if let Some(observer) = &self.observer {
            observer(state, process_id);
        }
    }
}

impl Default for ConstrainedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

// Debug implementations have no API contract to test.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl fmt::Debug for ConstrainedLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstrainedLauncher")
            .field("pal", &self.pal)
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

/// Merges the program and its arguments into one command line string.
///
/// The program is always quoted. Arguments are quoted only if they contain whitespace, without any
/// escaping of their content.
pub(crate) fn build_command_line(program: &Path, args: &[String]) -> String {
    let mut command_line = format!("\"{}\"", program.display());

    for arg in args {
        command_line.push(' ');

        if arg.contains(char::is_whitespace) {
            command_line.push('"');
            command_line.push_str(arg);
            command_line.push('"');
        } else {
            command_line.push_str(arg);
        }
    }

    command_line
}
