use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{CoreKindTags, Error, Result};

/// A launch profile: defaults for any command line value, loaded from a TOML file.
///
/// ```toml
/// target = "C:\\Games\\game.exe"
/// args = ["-windowed"]
/// working_dir = "C:\\Games"
/// select = "p"
/// invert = false
/// log = true
/// log_path = "capl.log"
///
/// [core_kind_tags]
/// performance = 0x40
/// ```
///
/// Every field is optional. Values given on the command line take precedence.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
#[non_exhaustive]
pub struct Profile {
    /// Executable to launch.
    pub target: Option<PathBuf>,

    /// Arguments passed to the executable.
    pub args: Option<Vec<String>>,

    /// Working directory of the launched process.
    pub working_dir: Option<PathBuf>,

    /// Core kind selection, same values as `--select`.
    pub select: Option<String>,

    /// Explicit core list, same syntax as `--cores`.
    pub cores: Option<String>,

    /// Whether to invert the selection.
    pub invert: Option<bool>,

    /// Whether to write a log file.
    pub log: Option<bool>,

    /// Where to write the log file.
    pub log_path: Option<PathBuf>,

    /// Tag values that identify the named core kinds.
    #[serde(default)]
    pub core_kind_tags: CoreKindTags,
}

impl Profile {
    /// Reads and parses the profile at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProfile`] if the file cannot be read or is not a valid profile.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::InvalidProfile {
            path: path.to_path_buf(),
            problem: e.to_string(),
        })?;

        Self::parse(&text, path)
    }

    /// Parses profile text. `path` is only used to describe errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProfile`] if the text is not a valid profile.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidProfile {
            path: path.to_path_buf(),
            problem: e.message().to_string(),
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::CoreKindTag;

    #[test]
    fn full_profile_parses() {
        let profile = Profile::parse(
            r#"
                target = "game.exe"
                args = ["-windowed", "two words"]
                working_dir = "games"
                select = "p"
                invert = true
                log = true
                log_path = "game.log"

                [core_kind_tags]
                efficiency = 0x21
            "#,
            Path::new("test.toml"),
        )
        .unwrap();

        assert_eq!(profile.target.as_deref(), Some(Path::new("game.exe")));
        assert_eq!(
            profile.args,
            Some(vec!["-windowed".to_string(), "two words".to_string()])
        );
        assert_eq!(profile.working_dir.as_deref(), Some(Path::new("games")));
        assert_eq!(profile.select.as_deref(), Some("p"));
        assert_eq!(profile.cores, None);
        assert_eq!(profile.invert, Some(true));
        assert_eq!(profile.log, Some(true));
        assert_eq!(profile.log_path.as_deref(), Some(Path::new("game.log")));
        assert_eq!(
            profile.core_kind_tags.efficiency,
            CoreKindTag::new(0x21)
        );
        assert_eq!(
            profile.core_kind_tags.performance,
            CoreKindTag::new(0x40)
        );
    }

    #[test]
    fn empty_profile_is_all_defaults() {
        let profile = Profile::parse("", Path::new("empty.toml")).unwrap();

        assert_eq!(profile, Profile::default());
    }

    #[test]
    fn unknown_field_is_invalid() {
        let result = Profile::parse("detect = \"P\"", Path::new("old.toml"));

        match result {
            Err(Error::InvalidProfile { path, problem }) => {
                assert_eq!(path, Path::new("old.toml"));
                assert!(problem.contains("detect"), "{problem}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn tag_out_of_byte_range_is_invalid() {
        let result = Profile::parse(
            "[core_kind_tags]\nperformance = 0x140",
            Path::new("tags.toml"),
        );

        assert!(matches!(result, Err(Error::InvalidProfile { .. })));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cores = \"0,2\"").unwrap();

        let profile = Profile::load(file.path()).unwrap();

        assert_eq!(profile.cores.as_deref(), Some("0,2"));
    }

    #[test]
    fn missing_file_is_invalid_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let result = Profile::load(&path);

        assert!(matches!(result, Err(Error::InvalidProfile { .. })));
    }
}
