use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::{env, io, iter, mem, ptr};

use libc::{c_char, c_int, cpu_set_t, pid_t};

use crate::pal::{ChildProcess, CpuidRegisters, Platform, ProcessCommand, cpuid};

/// Exit code of a child that failed before it could become the target, following the shell
/// convention for "command could not be executed".
const CHILD_SETUP_FAILED: c_int = 127;

/// Singleton instance of `BuildTargetPlatform`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

/// The platform that matches the crate's build target.
///
/// Linux has no "create suspended" primitive, so the child is forked and stops itself with
/// `SIGSTOP` before replacing itself with the target image. Until the parent sends `SIGCONT`, no
/// instruction of the target runs. The child is reaped when waited for or terminated.
///
/// If the child cannot become the target, it writes its `errno` into a close-on-exec pipe before
/// exiting. The parent keeps the read end as the `thread` handle of the [`ChildProcess`]: reading
/// end-of-file from it means the target image was loaded.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

// Real OS bindings are excluded from coverage measurement because:
// 1. They are tested via integration tests running on actual Linux.
// 2. Error paths require OS-level failures that are impractical to trigger in tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Platform for BuildTargetPlatform {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegisters {
        cpuid::execute(leaf, subleaf)
    }

    fn logical_processor_count(&self) -> u32 {
        // SAFETY: No safety requirements.
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };

        u32::try_from(online)
            .ok()
            .filter(|count| *count > 0)
            .unwrap_or(1)
    }

    fn current_thread_affinity(&self) -> io::Result<usize> {
        // SAFETY: All zeroes is a valid cpu_set_t.
        let mut cpuset: cpu_set_t = unsafe { mem::zeroed() };

        // 0 means current thread.
        // SAFETY: No safety requirements beyond passing valid arguments.
        let result = unsafe { libc::sched_getaffinity(0, size_of::<cpu_set_t>(), &raw mut cpuset) };

        if result == 0 {
            Ok(from_cpu_set(&cpuset))
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn set_current_thread_affinity(&self, mask: usize) -> io::Result<()> {
        let cpuset = to_cpu_set(mask);

        // 0 means current thread.
        // SAFETY: No safety requirements beyond passing valid arguments.
        let result = unsafe { libc::sched_setaffinity(0, size_of::<cpu_set_t>(), &raw const cpuset) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn yield_current_thread(&self) {
        // SAFETY: No safety requirements.
        unsafe { libc::sched_yield() };
    }

    fn search_executable(&self, program: &Path) -> Result<PathBuf, (io::Error, String)> {
        // Anything with a directory component is taken as is, bare names are looked up in PATH.
        if program.components().count() > 1 {
            return if is_executable_file(program) {
                Ok(program.to_path_buf())
            } else {
                Err((
                    io::Error::from(io::ErrorKind::NotFound),
                    program.display().to_string(),
                ))
            };
        }

        let path_var = env::var_os("PATH").unwrap_or_default();

        env::split_paths(&path_var)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable_file(candidate))
            .ok_or_else(|| {
                (
                    io::Error::from(io::ErrorKind::NotFound),
                    format!("PATH={}", path_var.to_string_lossy()),
                )
            })
    }

    fn create_suspended_process(&self, command: &ProcessCommand) -> io::Result<ChildProcess> {
        // Everything the child needs is prepared up front, as between fork and exec the child may
        // only call async-signal-safe functions.
        let program = CString::new(command.program.as_os_str().as_bytes())?;

        let args = command
            .args
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let argv: Vec<*const c_char> = iter::once(program.as_ptr())
            .chain(args.iter().map(|arg| arg.as_ptr()))
            .chain(iter::once(ptr::null()))
            .collect();

        let working_dir = match &command.working_dir {
            Some(dir) if !dir.is_dir() => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("working directory '{}' does not exist", dir.display()),
                ));
            }
            Some(dir) => Some(CString::new(dir.as_os_str().as_bytes())?),
            None => None,
        };

        let (status_reader, status_writer) = exec_status_pipe()?;

        // SAFETY: The child only calls async-signal-safe functions before exec or exit.
        let pid = unsafe { libc::fork() };

        if pid < 0 {
            return Err(io::Error::last_os_error());
        }

        if pid == 0 {
            // SAFETY: We are the freshly forked child.
            unsafe {
                become_target(
                    &program,
                    &argv,
                    working_dir.as_ref(),
                    status_reader.as_raw_fd(),
                    status_writer.as_raw_fd(),
                )
            }
        }

        // Only the child may hold the write end, or end-of-file would never arrive.
        drop(status_writer);

        // The child is not suspended until it reports itself as stopped.
        let wait_result = wait_for_state_change(pid, libc::WUNTRACED);

        adopt_stopped_child(pid, status_reader, wait_result)
    }

    fn set_process_affinity(&self, child: &ChildProcess, mask: usize) -> io::Result<()> {
        let cpuset = to_cpu_set(mask);

        // The child is single-threaded, so its main thread affinity is the process affinity and
        // it is inherited by the target image.
        // SAFETY: No safety requirements beyond passing valid arguments.
        let result = unsafe {
            libc::sched_setaffinity(pid_of(child), size_of::<cpu_set_t>(), &raw const cpuset)
        };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn resume_process(&self, child: &ChildProcess) -> io::Result<()> {
        // SAFETY: No safety requirements.
        let result = unsafe { libc::kill(pid_of(child), libc::SIGCONT) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn wait_for_image_start(&self, child: &ChildProcess) -> io::Result<()> {
        read_exec_status(status_fd_of(child))
    }

    fn terminate_process(&self, child: &ChildProcess, _exit_code: u32) {
        kill_and_reap(pid_of(child));
    }

    fn wait_for_exit(&self, child: &ChildProcess) -> io::Result<i32> {
        let pid = pid_of(child);

        loop {
            let status = wait_for_state_change(pid, 0)?;

            if libc::WIFEXITED(status) {
                return Ok(libc::WEXITSTATUS(status));
            }

            if libc::WIFSIGNALED(status) {
                // Same convention as shells use for signal deaths.
                return Ok(libc::WTERMSIG(status).saturating_add(128));
            }
        }
    }

    fn close_handles(&self, child: &ChildProcess) {
        // SAFETY: The descriptor was handed out by `create_suspended_process()` and ownership
        // returns to us here.
        drop(unsafe { OwnedFd::from_raw_fd(status_fd_of(child)) });
    }
}

/// Takes ownership of a freshly forked child once waiting for it to stop has finished.
///
/// Unless the child stopped as expected, it is killed and reaped before the error is returned.
fn adopt_stopped_child(
    pid: pid_t,
    status_reader: OwnedFd,
    wait_result: io::Result<c_int>,
) -> io::Result<ChildProcess> {
    let status = match wait_result {
        Ok(status) => status,
        Err(error) => {
            kill_and_reap(pid);
            return Err(error);
        }
    };

    if !libc::WIFSTOPPED(status) {
        // Already reaped by the wait. The reason it gave, if any, beats the raw wait status.
        read_exec_status(status_reader.as_raw_fd())?;

        return Err(io::Error::other(format!(
            "process {pid} ended before reaching the target (wait status {status:#x})"
        )));
    }

    Ok(ChildProcess {
        process_id: pid.unsigned_abs(),
        process: pid as isize,
        thread: status_reader.into_raw_fd() as isize,
    })
}

fn kill_and_reap(pid: pid_t) {
    // SAFETY: No safety requirements.
    let result = unsafe { libc::kill(pid, libc::SIGKILL) };

    // Reap it, so no zombie is left behind.
    if result == 0 {
        drop(wait_for_state_change(pid, 0));
    }
}

/// Turns the freshly forked child into the target, stopping on the way until the parent resumes us.
///
/// # Safety
///
/// Must only be called in the child branch of `fork()`.
unsafe fn become_target(
    program: &CString,
    argv: &[*const c_char],
    working_dir: Option<&CString>,
    status_reader: RawFd,
    status_writer: RawFd,
) -> ! {
    // SAFETY: Async-signal-safe. The parent owns the read end.
    unsafe {
        libc::close(status_reader);
    }

    // Rust ignores SIGPIPE, the target should get the default disposition back.
    // SAFETY: Async-signal-safe.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    if let Some(dir) = working_dir {
        // SAFETY: Async-signal-safe, the string is null-terminated.
        if unsafe { libc::chdir(dir.as_ptr()) } != 0 {
            // SAFETY: We are still the forked child.
            unsafe { report_setup_failure(status_writer) }
        }
    }

    // SAFETY: Async-signal-safe.
    unsafe {
        libc::raise(libc::SIGSTOP);
    }

    // On success the write end is closed by exec, which the parent sees as end-of-file.
    // SAFETY: Async-signal-safe, argv is null-terminated and every entry is a valid C string.
    unsafe {
        libc::execv(program.as_ptr(), argv.as_ptr());
    }

    // SAFETY: We are still the forked child.
    unsafe { report_setup_failure(status_writer) }
}

/// Sends the current `errno` to the parent and exits.
///
/// # Safety
///
/// Must only be called in the child branch of `fork()`.
unsafe fn report_setup_failure(status_writer: RawFd) -> ! {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    let bytes = errno.to_ne_bytes();

    // Nothing can be done if the parent is gone, it will see the exit code either way.
    // SAFETY: Async-signal-safe, the buffer is valid for its full length.
    unsafe {
        libc::write(status_writer, bytes.as_ptr().cast(), bytes.len());
    }

    // SAFETY: Async-signal-safe.
    unsafe { libc::_exit(CHILD_SETUP_FAILED) }
}

fn exec_status_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1; 2];

    // Close-on-exec, so that a successful exec closes the write end.
    // SAFETY: The array has room for both descriptors.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let [reader, writer] = fds;

    // SAFETY: Both descriptors were just created and nothing else owns them.
    Ok(unsafe { (OwnedFd::from_raw_fd(reader), OwnedFd::from_raw_fd(writer)) })
}

/// Blocks until the child either loaded the target image (`Ok`) or reported why it could not.
fn read_exec_status(status_reader: RawFd) -> io::Result<()> {
    let mut errno = [0_u8; size_of::<c_int>()];

    loop {
        // SAFETY: The buffer is valid for writes of its full length.
        let read = unsafe { libc::read(status_reader, errno.as_mut_ptr().cast(), errno.len()) };

        match usize::try_from(read) {
            Ok(0) => return Ok(()),
            Ok(len) if len == errno.len() => {
                return Err(io::Error::from_raw_os_error(c_int::from_ne_bytes(errno)));
            }
            Ok(len) => {
                return Err(io::Error::other(format!(
                    "child reported a truncated setup failure ({len} bytes)"
                )));
            }
            Err(_) => {
                let error = io::Error::last_os_error();

                if error.kind() != io::ErrorKind::Interrupted {
                    return Err(error);
                }
            }
        }
    }
}

fn wait_for_state_change(pid: pid_t, options: c_int) -> io::Result<c_int> {
    let mut status: c_int = 0;

    loop {
        // SAFETY: No safety requirements beyond passing valid arguments.
        let result = unsafe { libc::waitpid(pid, &raw mut status, options) };

        if result == pid {
            return Ok(status);
        }

        let error = io::Error::last_os_error();

        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

fn to_cpu_set(mask: usize) -> cpu_set_t {
    // SAFETY: All zeroes is a valid cpu_set_t.
    let mut cpuset: cpu_set_t = unsafe { mem::zeroed() };

    for cpu in (0..usize::BITS).filter(|cpu| mask & (1 << cpu) != 0) {
        // SAFETY: The index is well below CPU_SETSIZE.
        unsafe { libc::CPU_SET(cpu as usize, &mut cpuset) };
    }

    cpuset
}

fn from_cpu_set(cpuset: &cpu_set_t) -> usize {
    (0..usize::BITS)
        // SAFETY: The index is well below CPU_SETSIZE.
        .filter(|cpu| unsafe { libc::CPU_ISSET(*cpu as usize, cpuset) })
        .fold(0, |mask, cpu| mask | (1 << cpu))
}

fn pid_of(child: &ChildProcess) -> pid_t {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "the value was created from a pid_t"
    )]
    let pid = child.process as pid_t;

    pid
}

fn status_fd_of(child: &ChildProcess) -> RawFd {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "the value was created from a RawFd"
    )]
    let fd = child.thread as RawFd;

    fd
}

fn is_executable_file(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    /// Forks a child that stops itself and exits once continued. It never runs any Rust code.
    fn fork_self_stopping_child() -> pid_t {
        // SAFETY: The child only calls async-signal-safe functions.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed: {}", io::Error::last_os_error());

        if pid == 0 {
            // SAFETY: Async-signal-safe.
            unsafe {
                libc::raise(libc::SIGSTOP);
                libc::_exit(0);
            }
        }

        pid
    }

    fn is_reaped(pid: pid_t) -> bool {
        let mut status: c_int = 0;

        // SAFETY: No safety requirements beyond passing valid arguments.
        let result = unsafe { libc::waitpid(pid, &raw mut status, libc::WNOHANG) };

        result == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::ECHILD)
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
    fn failed_wait_kills_and_reaps_child() {
        let (status_reader, _status_writer) = exec_status_pipe().unwrap();
        let pid = fork_self_stopping_child();

        let result = adopt_stopped_child(
            pid,
            status_reader,
            Err(io::Error::from_raw_os_error(libc::EINVAL)),
        );

        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::EINVAL));
        assert!(is_reaped(pid));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
    fn stopped_child_is_adopted() {
        let (status_reader, status_writer) = exec_status_pipe().unwrap();
        let pid = fork_self_stopping_child();
        drop(status_writer);

        let wait_result = wait_for_state_change(pid, libc::WUNTRACED);
        let child = adopt_stopped_child(pid, status_reader, wait_result).unwrap();

        assert_eq!(child.process_id, pid.unsigned_abs());

        BUILD_TARGET_PLATFORM.terminate_process(&child, 1);
        BUILD_TARGET_PLATFORM.close_handles(&child);

        assert!(is_reaped(pid));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
    fn setup_failure_reports_child_errno() {
        let (status_reader, status_writer) = exec_status_pipe().unwrap();
        let writer_fd = status_writer.as_raw_fd();

        // SAFETY: The child only calls async-signal-safe functions.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed: {}", io::Error::last_os_error());

        if pid == 0 {
            // SAFETY: We are the forked child, errno is ours to set.
            unsafe {
                *libc::__errno_location() = libc::ENOEXEC;
                report_setup_failure(writer_fd)
            }
        }

        drop(status_writer);

        let wait_result = wait_for_state_change(pid, libc::WUNTRACED);
        let result = adopt_stopped_child(pid, status_reader, wait_result);

        assert_eq!(result.unwrap_err().raw_os_error(), Some(libc::ENOEXEC));
        assert!(is_reaped(pid));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
    fn closed_status_pipe_means_image_started() {
        let (status_reader, status_writer) = exec_status_pipe().unwrap();
        drop(status_writer);

        read_exec_status(status_reader.as_raw_fd()).unwrap();
    }

    #[test]
    fn cpu_set_conversion_keeps_bits() {
        let mask = 0b1010_0110_usize | (1 << (usize::BITS - 1));

        assert_eq!(from_cpu_set(&to_cpu_set(mask)), mask);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
    fn current_thread_affinity_is_not_empty() {
        let mask = BUILD_TARGET_PLATFORM.current_thread_affinity().unwrap();

        assert_ne!(mask, 0);
    }
}
