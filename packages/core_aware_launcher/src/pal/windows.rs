use std::ffi::{OsStr, c_void};
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::{env, io, iter, mem};

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED};
use windows::Win32::Storage::FileSystem::SearchPathW;
use windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows::Win32::System::Threading::{
    CREATE_SUSPENDED, CreateProcessW, GetCurrentProcess, GetCurrentThread, GetExitCodeProcess,
    GetProcessAffinityMask, INFINITE, PROCESS_INFORMATION, ResumeThread, STARTUPINFOW, SetProcessAffinityMask,
    SetThreadAffinityMask, Sleep, TerminateProcess, WaitForSingleObject,
};
use windows::core::{PCWSTR, PWSTR};

use crate::pal::{ChildProcess, CpuidRegisters, Platform, ProcessCommand, cpuid};

const DEFAULT_SEARCH_ORDER: &str =
    "application directory, current directory, system directories";

/// Singleton instance of `BuildTargetPlatform`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

/// The platform that matches the crate's build target.
///
/// You would only use a different platform in unit tests that need to mock the platform.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

// Real OS bindings are excluded from coverage measurement because:
// 1. They are tested via integration tests running on actual Windows.
// 2. Error paths require OS-level failures that are impractical to trigger in tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Platform for BuildTargetPlatform {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegisters {
        cpuid::execute(leaf, subleaf)
    }

    fn logical_processor_count(&self) -> u32 {
        let mut info = SYSTEM_INFO::default();

        // SAFETY: No safety requirements beyond passing valid input.
        unsafe { GetSystemInfo(&raw mut info) };

        info.dwNumberOfProcessors
    }

    fn current_thread_affinity(&self) -> io::Result<usize> {
        // SAFETY: No safety requirements. Does not need to be closed.
        let current_process = unsafe { GetCurrentProcess() };

        // What processors we are allowed to use.
        let mut process_affinity = 0;

        // What processors exist.
        let mut system_affinity = 0;

        // Threads start out with the process affinity and we only narrow it while classifying.
        // SAFETY: No safety requirements beyond passing valid input.
        unsafe {
            GetProcessAffinityMask(
                current_process,
                &raw mut process_affinity,
                &raw mut system_affinity,
            )
        }?;

        Ok(process_affinity)
    }

    fn set_current_thread_affinity(&self, mask: usize) -> io::Result<()> {
        // SAFETY: No safety requirements. Does not require closing the handle.
        let current_thread = unsafe { GetCurrentThread() };

        // SAFETY: No safety requirements beyond passing valid input.
        let previous = unsafe { SetThreadAffinityMask(current_thread, mask) };

        // The previous mask is never zero, so zero signals failure.
        if previous == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn yield_current_thread(&self) {
        // SAFETY: No safety requirements.
        unsafe { Sleep(0) };
    }

    fn search_executable(&self, program: &Path) -> Result<PathBuf, (io::Error, String)> {
        let file_name = to_wide(program.as_os_str());
        let extension = to_wide(OsStr::new(".exe"));

        let mut buffer = vec![0_u16; 260];

        loop {
            // SAFETY: Both strings are null-terminated and outlive the call.
            let length = unsafe {
                SearchPathW(
                    PCWSTR::null(),
                    PCWSTR(file_name.as_ptr()),
                    PCWSTR(extension.as_ptr()),
                    Some(&mut buffer),
                    None,
                )
            } as usize;

            if length == 0 {
                let error = io::Error::last_os_error();
                let searched = env::var("PATH").map_or_else(
                    |_| DEFAULT_SEARCH_ORDER.to_string(),
                    |path| format!("{DEFAULT_SEARCH_ORDER}, PATH={path}"),
                );

                return Err((error, searched));
            }

            // If the buffer was too small, the return value is the required size including the
            // terminating null, otherwise it is the length excluding it.
            if length < buffer.len() {
                buffer.truncate(length);
                return Ok(PathBuf::from(String::from_utf16_lossy(&buffer)));
            }

            buffer.resize(length, 0);
        }
    }

    fn create_suspended_process(&self, command: &ProcessCommand) -> io::Result<ChildProcess> {
        // CreateProcessW may modify the command line buffer in place, so it must be mutable.
        let mut command_line = to_wide(OsStr::new(&command.command_line));

        let working_dir = command
            .working_dir
            .as_ref()
            .map(|dir| to_wide(dir.as_os_str()));

        let working_dir_ptr = working_dir
            .as_ref()
            .map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr()));

        let startup_info = STARTUPINFOW {
            cb: u32::try_from(mem::size_of::<STARTUPINFOW>())
                .expect("struct of known size guaranteed to fit in u32"),
            ..Default::default()
        };

        let mut process_info = PROCESS_INFORMATION::default();

        // SAFETY: All strings are null-terminated and outlive the call.
        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                Some(PWSTR(command_line.as_mut_ptr())),
                None,
                None,
                true,
                CREATE_SUSPENDED,
                None,
                working_dir_ptr,
                &raw const startup_info,
                &raw mut process_info,
            )
        }?;

        Ok(ChildProcess {
            process_id: process_info.dwProcessId,
            process: process_info.hProcess.0 as isize,
            thread: process_info.hThread.0 as isize,
        })
    }

    fn set_process_affinity(&self, child: &ChildProcess, mask: usize) -> io::Result<()> {
        // SAFETY: The handle is owned by `child` and still open.
        unsafe { SetProcessAffinityMask(to_handle(child.process), mask) }?;

        Ok(())
    }

    fn resume_process(&self, child: &ChildProcess) -> io::Result<()> {
        // SAFETY: The handle is owned by `child` and still open.
        let previous_suspend_count = unsafe { ResumeThread(to_handle(child.thread)) };

        if previous_suspend_count == u32::MAX {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn wait_for_image_start(&self, _child: &ChildProcess) -> io::Result<()> {
        // CreateProcessW() only succeeds once the image is mapped.
        Ok(())
    }

    fn terminate_process(&self, child: &ChildProcess, exit_code: u32) {
        // SAFETY: The handle is owned by `child` and still open.
        drop(unsafe { TerminateProcess(to_handle(child.process), exit_code) });
    }

    fn wait_for_exit(&self, child: &ChildProcess) -> io::Result<i32> {
        let process = to_handle(child.process);

        // SAFETY: The handle is owned by `child` and still open.
        let wait_result = unsafe { WaitForSingleObject(process, INFINITE) };

        if wait_result == WAIT_FAILED {
            return Err(io::Error::last_os_error());
        }

        let mut exit_code: u32 = 0;

        // SAFETY: The handle is owned by `child` and still open.
        unsafe { GetExitCodeProcess(process, &raw mut exit_code) }?;

        // Exit codes are DWORDs but commonly treated as signed (NTSTATUS values).
        #[expect(
            clippy::cast_possible_wrap,
            reason = "reinterpreting the bits is the intent"
        )]
        let exit_code = exit_code as i32;

        Ok(exit_code)
    }

    fn close_handles(&self, child: &ChildProcess) {
        // SAFETY: The handles are owned by `child` and closed exactly once, here.
        drop(unsafe { CloseHandle(to_handle(child.process)) });

        // SAFETY: As above.
        drop(unsafe { CloseHandle(to_handle(child.thread)) });
    }
}

fn to_wide(value: &OsStr) -> Vec<u16> {
    value.encode_wide().chain(iter::once(0)).collect()
}

fn to_handle(raw: isize) -> HANDLE {
    HANDLE(raw as *mut c_void)
}
