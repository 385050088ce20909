use std::io::{self, Write};

/// Where human-readable results of a run are presented.
///
/// The core never prints anything itself. Everything the user should see goes through a reporter,
/// so the same run logic serves the console tool and the dialog-based tool.
pub trait Reporter {
    /// Presents a failure.
    fn report_error(&self, message: &str);

    /// Presents a status message.
    fn report_info(&self, message: &str);

    /// Presents usage information.
    fn report_help(&self, message: &str);

    /// Presents the processor topology report of query mode.
    fn report_query_result(&self, message: &str);

    /// Brings the display back into a consistent state after a launched process exits.
    ///
    /// A launched console process shares our console and may leave it in any state.
    fn refresh_display(&self) {}
}

/// Reports to the console: failures to stderr, everything else to stdout.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct ConsoleReporter;

impl ConsoleReporter {
    /// Creates a console reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

// Console output has no API contract to test beyond "it prints".
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Reporter for ConsoleReporter {
    fn report_error(&self, message: &str) {
        eprintln!("Error: {message}");
    }

    fn report_info(&self, message: &str) {
        println!("{message}");
    }

    fn report_help(&self, message: &str) {
        println!("{message}");
    }

    fn report_query_result(&self, message: &str) {
        println!("{message}");
    }

    fn refresh_display(&self) {
        // Nothing useful to do if our own output is gone.
        drop(io::stdout().flush());

        #[cfg(windows)]
        windows_ui::reapply_cursor_position();
    }
}

/// Reports via modal message boxes, for use without a console window.
#[cfg(windows)]
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct DialogReporter;

#[cfg(windows)]
impl DialogReporter {
    /// Creates a dialog reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

// Modal dialogs cannot be exercised by automated tests.
#[cfg(windows)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Reporter for DialogReporter {
    fn report_error(&self, message: &str) {
        windows_ui::message_box(message, "CAPL Error", windows_ui::Icon::Error);
    }

    fn report_info(&self, message: &str) {
        windows_ui::message_box(message, "CAPL Information", windows_ui::Icon::Information);
    }

    fn report_help(&self, message: &str) {
        windows_ui::message_box(message, "CAPL Help", windows_ui::Icon::Information);
    }

    fn report_query_result(&self, message: &str) {
        windows_ui::message_box(message, "CAPL Query Result", windows_ui::Icon::Information);
    }
}

#[cfg(windows)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod windows_ui {
    use std::ffi::OsStr;
    use std::iter;
    use std::os::windows::ffi::OsStrExt;

    use windows::Win32::System::Console::{
        CONSOLE_SCREEN_BUFFER_INFO, GetConsoleScreenBufferInfo, GetStdHandle,
        STD_OUTPUT_HANDLE, SetConsoleCursorPosition,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        MB_ICONERROR, MB_ICONINFORMATION, MB_OK, MessageBoxW,
    };
    use windows::core::PCWSTR;

    pub(super) enum Icon {
        Error,
        Information,
    }

    pub(super) fn message_box(text: &str, caption: &str, icon: Icon) {
        let text = to_wide(text);
        let caption = to_wide(caption);

        let icon = match icon {
            Icon::Error => MB_ICONERROR,
            Icon::Information => MB_ICONINFORMATION,
        };

        // SAFETY: Both strings are null-terminated and outlive the call.
        unsafe {
            MessageBoxW(
                None,
                PCWSTR(text.as_ptr()),
                PCWSTR(caption.as_ptr()),
                MB_OK | icon,
            );
        }
    }

    /// Setting the cursor to where it already is forces the console to repaint it, which a child
    /// process that redrew the console may have left hidden or stale.
    pub(super) fn reapply_cursor_position() {
        // SAFETY: No safety requirements. Does not require closing the handle.
        let Ok(console) = (unsafe { GetStdHandle(STD_OUTPUT_HANDLE) }) else {
            return;
        };

        let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();

        // SAFETY: No safety requirements beyond passing valid input.
        if unsafe { GetConsoleScreenBufferInfo(console, &raw mut info) }.is_err() {
            // Output is redirected, there is no cursor.
            return;
        }

        // SAFETY: No safety requirements beyond passing valid input.
        drop(unsafe { SetConsoleCursorPosition(console, info.dwCursorPosition) });
    }

    fn to_wide(value: &str) -> Vec<u16> {
        OsStr::new(value)
            .encode_wide()
            .chain(iter::once(0))
            .collect()
    }
}
