//! Launches real processes through the operating system to verify that the suspended-create,
//! constrain, resume sequence works end to end and cleans up after itself when a step fails.

#![cfg(not(miri))]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use core_aware_launcher::{
    AffinityMask, AffinityResolver, ConstrainedLauncher, CoreClassifier, Error, LaunchState,
    Selection, SelectionRequest,
};

/// A shell that exits with the given code, as (program, args).
fn exit_with(code: i32) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        ("cmd", vec!["/C".to_string(), format!("exit {code}")])
    } else {
        ("sh", vec!["-c".to_string(), format!("exit {code}")])
    }
}

fn all_cores() -> AffinityMask {
    let capabilities = CoreClassifier::new().capabilities().unwrap();

    AffinityResolver::new(&capabilities)
        .resolve(&SelectionRequest::new(Selection::AllCores, false))
        .unwrap()
}

fn recording_launcher() -> (ConstrainedLauncher, Arc<Mutex<Vec<LaunchState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));

    let launcher = ConstrainedLauncher::new().with_state_observer({
        let states = Arc::clone(&states);
        move |state, _| states.lock().unwrap().push(state)
    });

    (launcher, states)
}

#[test]
fn exit_code_is_propagated() {
    let (program, args) = exit_with(7);
    let (launcher, states) = recording_launcher();

    let outcome = launcher
        .launch(Path::new(program), &args, None, all_cores())
        .unwrap();

    assert_eq!(outcome.exit_code(), 7);
    assert_ne!(outcome.process_id(), 0);
    assert_eq!(
        *states.lock().unwrap(),
        [
            LaunchState::Created,
            LaunchState::AffinityApplied,
            LaunchState::Resumed,
            LaunchState::Completed,
        ]
    );

    // Waited for and reaped, so not even a zombie remains.
    assert!(!process_exists(outcome.process_id()));
}

#[test]
fn runs_on_single_processor() {
    let (program, args) = exit_with(0);

    let outcome = ConstrainedLauncher::new()
        .launch(Path::new(program), &args, None, AffinityMask::from_bits(1))
        .unwrap();

    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();

    let (program, args) = if cfg!(windows) {
        ("cmd", vec!["/C".to_string(), "type marker.txt".to_string()])
    } else {
        ("sh", vec!["-c".to_string(), "test -f marker.txt".to_string()])
    };

    fs::write(dir.path().join("marker.txt"), "x").unwrap();

    let outcome = ConstrainedLauncher::new()
        .launch(Path::new(program), &args, Some(dir.path()), all_cores())
        .unwrap();

    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn missing_executable_creates_nothing() {
    let (launcher, states) = recording_launcher();

    let result = launcher.launch(
        Path::new("capl_test_no_such_program_8f3a"),
        &[],
        None,
        all_cores(),
    );

    assert!(matches!(result, Err(Error::ExecutableNotFound { .. })));
    assert!(states.lock().unwrap().is_empty());
}

#[test]
fn rejected_affinity_terminates_child() {
    let capabilities = CoreClassifier::new().capabilities().unwrap();

    if capabilities.processor_count() >= AffinityMask::WIDTH {
        eprintln!("Skipping test: every mask bit names an existing processor.");
        return;
    }

    // Only a processor that does not exist, which no operating system accepts.
    let mask = AffinityMask::from_bits(1 << (AffinityMask::WIDTH - 1));

    let (program, args) = exit_with(0);
    let (launcher, states) = recording_launcher();

    let result = launcher.launch(Path::new(program), &args, None, mask);

    let Err(Error::AffinityApplyFailed { process_id, .. }) = result else {
        panic!("expected affinity failure, got {result:?}");
    };

    assert_eq!(*states.lock().unwrap(), [LaunchState::Created]);

    assert!(!process_exists(process_id));
}

#[cfg(target_os = "linux")]
#[test]
fn unloadable_image_is_create_failure() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("not_a_program");

    // Executable bit set, but neither a binary image nor a script.
    fs::write(&program, [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

    let (launcher, states) = recording_launcher();

    let result = launcher.launch(&program, &[], None, all_cores());

    let Err(Error::ProcessCreateFailed { path, source }) = result else {
        panic!("expected process creation failure, got {result:?}");
    };

    assert_eq!(path, program);
    assert_eq!(source.raw_os_error(), Some(libc::ENOEXEC));

    // The child never got to run the image, so it never counted as resumed.
    assert_eq!(
        *states.lock().unwrap(),
        [LaunchState::Created, LaunchState::AffinityApplied]
    );
}

/// Whether a process with this ID is still around, including as an unreaped zombie.
#[cfg(target_os = "linux")]
fn process_exists(process_id: u32) -> bool {
    Path::new(&format!("/proc/{process_id}")).exists()
}

/// Whether a process with this ID is still running.
#[cfg(windows)]
fn process_exists(process_id: u32) -> bool {
    use windows::Win32::Foundation::{CloseHandle, WAIT_TIMEOUT};
    use windows::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE, WaitForSingleObject,
    };

    // SAFETY: No safety requirements.
    let Ok(process) = (unsafe {
        OpenProcess(
            PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SYNCHRONIZE,
            false,
            process_id,
        )
    }) else {
        // The process object is gone entirely.
        return false;
    };

    // Someone else may still hold a handle to it, but it must have exited.
    // SAFETY: We own the handle.
    let running = unsafe { WaitForSingleObject(process, 0) } == WAIT_TIMEOUT;

    // SAFETY: We own the handle.
    drop(unsafe { CloseHandle(process) });

    running
}
