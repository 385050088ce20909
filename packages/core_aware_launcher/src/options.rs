use std::collections::BTreeSet;
use std::path::PathBuf;

use argh::FromArgs;

use crate::{
    CoreKindTags, Error, LogicalProcessorId, Profile, Result, Selection, SelectionRequest,
};

/// Log file used when logging is enabled without naming a file.
pub const DEFAULT_LOG_PATH: &str = "capl.log";

/// Launch a program on selected logical processors of a hybrid CPU, e.g. only on its
/// performance cores.
#[derive(Debug, Default, FromArgs, PartialEq)]
#[argh(
    example = "{command_name} --target game.exe --select p",
    example = "{command_name} --target game.exe --cores 0,2,4-6 -- -windowed",
    example = "{command_name} --select e --invert --target build.exe",
    example = "{command_name} --query",
    note = "Exactly one of --select or --cores is required when launching."
)]
#[non_exhaustive]
pub struct CliArgs {
    /// cores to run on: p (performance), e (efficiency), lpe (low power efficiency),
    /// all-e (both efficiency kinds) or all
    #[argh(option, short = 's')]
    pub select: Option<String>,

    /// logical processors to run on, e.g. 0,2,4-6
    #[argh(option, short = 'c')]
    pub cores: Option<String>,

    /// run on every core except the selected ones
    #[argh(switch, short = 'i')]
    pub invert: bool,

    /// executable to launch
    #[argh(option, short = 't')]
    pub target: Option<PathBuf>,

    /// working directory of the launched process
    #[argh(option, short = 'w')]
    pub workdir: Option<PathBuf>,

    /// show processor information and exit
    #[argh(switch, short = 'q')]
    pub query: bool,

    /// write a log file
    #[argh(switch, short = 'l')]
    pub log: bool,

    /// log file path (default: capl.log)
    #[argh(option)]
    pub log_path: Option<PathBuf>,

    /// launch profile (TOML) supplying defaults for these options
    #[argh(option)]
    pub profile: Option<PathBuf>,

    /// arguments passed to the launched executable
    #[argh(positional, greedy)]
    pub args: Vec<String>,
}

/// What to launch, and where.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct LaunchRequest {
    /// Executable to launch, resolved against the executable search order at launch time.
    pub target: PathBuf,

    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Working directory of the launched process. `None` inherits ours.
    pub working_dir: Option<PathBuf>,

    /// Which logical processors the process may run on.
    pub selection: SelectionRequest,
}

/// What a run of the tool is going to do.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Mode {
    /// Report the processor topology.
    Query,

    /// Launch a process.
    Launch(LaunchRequest),
}

/// Validated options for one run, merged from the command line and an optional profile.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct Options {
    /// What to do.
    pub mode: Mode,

    /// Tag values that identify the named core kinds.
    pub core_kind_tags: CoreKindTags,

    /// Where to write the log. `None` disables logging.
    pub log_file: Option<PathBuf>,
}

impl Options {
    /// Validates command line arguments, loading and merging the profile they name, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProfile`] if the profile cannot be loaded and
    /// [`Error::InvalidOptions`] if the merged options do not describe a valid run.
    pub fn from_cli(cli: CliArgs) -> Result<Self> {
        let profile = match &cli.profile {
            Some(path) => Profile::load(path)?,
            None => Profile::default(),
        };

        Self::merge(cli, profile)
    }

    /// Merges command line arguments over a profile and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the merged options do not describe a valid run.
    pub fn merge(cli: CliArgs, profile: Profile) -> Result<Self> {
        let log_file = (cli.log || profile.log.unwrap_or(false)).then(|| {
            cli.log_path
                .clone()
                .or_else(|| profile.log_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH))
        });

        if cli.query {
            if cli.target.is_some() {
                return Err(invalid("--query cannot be used with --target"));
            }

            return Ok(Self {
                mode: Mode::Query,
                core_kind_tags: profile.core_kind_tags,
                log_file,
            });
        }

        let target = cli
            .target
            .or(profile.target)
            .ok_or_else(|| invalid("target path is required for process launching"))?;

        // The command line replaces the profile selection as a whole, it is not merged with it.
        let selection = if cli.select.is_some() || cli.cores.is_some() {
            parse_selection(cli.select.as_deref(), cli.cores.as_deref())?
        } else {
            parse_selection(profile.select.as_deref(), profile.cores.as_deref())?
        };

        let args = if cli.args.is_empty() {
            profile.args.unwrap_or_default()
        } else {
            cli.args
        };

        let invert = cli.invert || profile.invert.unwrap_or(false);

        Ok(Self {
            mode: Mode::Launch(LaunchRequest {
                target,
                args,
                working_dir: cli.workdir.or(profile.working_dir),
                selection: SelectionRequest::new(selection, invert),
            }),
            core_kind_tags: profile.core_kind_tags,
            log_file,
        })
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidOptions(message.into())
}

fn parse_selection(select: Option<&str>, cores: Option<&str>) -> Result<Selection> {
    match (select, cores) {
        (Some(_), Some(_)) => Err(invalid("--select and --cores cannot be used together")),
        (None, None) => Err(invalid("either --select or --cores must be specified")),
        (Some(kind), None) => parse_select(kind),
        (None, Some(list)) => parse_core_list(list).map(Selection::ExplicitList),
    }
}

/// Parses a `--select` value.
///
/// # Errors
///
/// Returns [`Error::InvalidOptions`] if the value names no known selection.
pub fn parse_select(value: &str) -> Result<Selection> {
    match value.to_ascii_lowercase().as_str() {
        "p" => Ok(Selection::PerformanceOnly),
        "e" => Ok(Selection::EfficiencyOnly),
        "lpe" => Ok(Selection::LowPowerEfficiencyOnly),
        "all-e" => Ok(Selection::AllEfficiency),
        "all" => Ok(Selection::AllCores),
        _ => Err(invalid(format!(
            "invalid core selection '{value}', valid values are: p, e, lpe, all-e, all"
        ))),
    }
}

/// Parses a `--cores` value: comma-separated processor IDs or `a-b` ranges.
///
/// # Errors
///
/// Returns [`Error::InvalidOptions`] if the list is empty, malformed or names a processor twice.
pub fn parse_core_list(value: &str) -> Result<Vec<LogicalProcessorId>> {
    let mut seen = BTreeSet::new();
    let mut ids = Vec::new();

    for item in value.split(',').map(str::trim) {
        if item.is_empty() {
            return Err(invalid(format!("empty item in core list '{value}'")));
        }

        let item_ids = cpulist::parse(item)
            .map_err(|e| invalid(format!("invalid core list '{value}': {e}")))?;

        for id in item_ids {
            if !seen.insert(id) {
                return Err(invalid(format!("duplicate core number {id} in core list")));
            }

            ids.push(id);
        }
    }

    Ok(ids)
}
