use std::error::Error as _;
use std::process::ExitCode;

use argh::FromArgs;
use tracing::subscriber::with_default;
use tracing::{error, info};

use crate::{
    AffinityResolver, CliArgs, ConstrainedLauncher, CoreClassifier, Error, LaunchRequest, Mode,
    Options, Reporter, Result, file_subscriber,
};

const HELP_HINT: &str = "Use --help for usage information.";

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;

/// Runs the tool with the given command line arguments (excluding the program name), presenting
/// all output through `reporter`.
///
/// The exit code is that of the launched process if it fits into an exit code, otherwise 0 for
/// successful queries and 1 for any failure.
#[must_use]
pub fn run(command_name: &str, args: &[&str], reporter: &dyn Reporter) -> ExitCode {
    ExitCode::from(run_to_status(command_name, args, reporter))
}

/// [`run`] returning the raw exit status, for tests.
#[doc(hidden)]
#[must_use]
pub fn run_to_status(command_name: &str, args: &[&str], reporter: &dyn Reporter) -> u8 {
    // Nothing to do means the user needs to be told what can be done.
    let args = if args.is_empty() { &["--help"][..] } else { args };

    let cli = match CliArgs::from_args(&[command_name], args) {
        Ok(cli) => cli,
        Err(early_exit) => {
            return match early_exit.status {
                Ok(()) => {
                    reporter.report_help(&early_exit.output);
                    EXIT_SUCCESS
                }
                Err(()) => {
                    reporter.report_error(early_exit.output.trim());
                    reporter.report_info(HELP_HINT);
                    EXIT_FAILURE
                }
            };
        }
    };

    let options = match Options::from_cli(cli) {
        Ok(options) => options,
        Err(e) => return fail(&e, reporter),
    };

    match &options.log_file {
        Some(path) => match file_subscriber(path) {
            Ok(subscriber) => with_default(subscriber, || execute(&options, reporter)),
            Err(e) => fail(&e, reporter),
        },
        None => execute(&options, reporter),
    }
}

fn execute(options: &Options, reporter: &dyn Reporter) -> u8 {
    info!(mode = ?options.mode, "starting");

    match execute_mode(options, reporter) {
        Ok(status) => status,
        Err(e) => fail(&e, reporter),
    }
}

fn execute_mode(options: &Options, reporter: &dyn Reporter) -> Result<u8> {
    let classifier = CoreClassifier::with_tags(options.core_kind_tags);

    match &options.mode {
        Mode::Query => {
            let capabilities = classifier.capabilities()?;
            reporter.report_query_result(&capabilities.to_string());
            Ok(EXIT_SUCCESS)
        }
        Mode::Launch(request) => launch(&classifier, request, reporter),
    }
}

fn launch(
    classifier: &CoreClassifier,
    request: &LaunchRequest,
    reporter: &dyn Reporter,
) -> Result<u8> {
    let capabilities = classifier.capabilities()?;
    let mask = AffinityResolver::new(&capabilities).resolve(&request.selection)?;

    info!(executable = %request.target.display(), %mask, "launching");

    let outcome = ConstrainedLauncher::new().launch(
        &request.target,
        &request.args,
        request.working_dir.as_deref(),
        mask,
    )?;

    reporter.refresh_display();
    reporter.report_info(&format!(
        "Process {} exited with code {}",
        outcome.process_id(),
        outcome.exit_code()
    ));

    Ok(u8::try_from(outcome.exit_code()).unwrap_or(EXIT_FAILURE))
}

fn fail(e: &Error, reporter: &dyn Reporter) -> u8 {
    let message = describe(e);

    error!(error = %message, "run failed");

    reporter.report_error(&message);
    reporter.report_info(HELP_HINT);

    EXIT_FAILURE
}

/// The error message followed by the messages of all its sources.
fn describe(e: &Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}
