use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::{AffinityMask, CoreKind, LogicalProcessorId};

/// Errors that can occur while classifying cores, resolving a selection or launching a process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The processor does not offer the CPU identification leaf that reports core types.
    #[error("this processor cannot report core types, so {kind:?} cores cannot be selected")]
    TopologyUnsupported {
        /// The kind that was requested.
        kind: CoreKind,
    },

    /// The processor reports core types but is not a hybrid design.
    #[error("this CPU does not support hybrid architecture, so {kind:?} cores cannot be selected")]
    HybridUnsupported {
        /// The kind that was requested.
        kind: CoreKind,
    },

    /// An explicitly listed core does not exist on this machine.
    #[error(
        "core number {id} exceeds system limit of {max_id}",
        max_id = .processor_count.saturating_sub(1)
    )]
    InvalidCoreId {
        /// The offending identifier.
        id: LogicalProcessorId,

        /// How many logical processors the machine has.
        processor_count: u32,
    },

    /// No selection was made at all.
    #[error("no core selection was made")]
    InvalidSelection,

    /// The selection resolved to no processors at all.
    #[error("resulting core mask is empty (base mask {base_mask}, inverted: {inverted})")]
    SelectionEmpty {
        /// The mask before inversion was applied.
        base_mask: AffinityMask,

        /// Whether inversion was requested.
        inverted: bool,
    },

    /// The machine has more logical processors than an affinity mask can describe.
    #[error(
        "{processor_count} logical processors do not fit into an affinity mask of {max_supported} bits"
    )]
    TooManyProcessors {
        /// How many processors were requested or reported.
        processor_count: u32,

        /// The width of an affinity mask.
        max_supported: u32,
    },

    /// The probing thread could not be moved onto a processor to identify its core type.
    #[error("failed to pin the probing thread to logical processor {processor}")]
    ProbeFailed {
        /// The processor that could not be probed.
        processor: LogicalProcessorId,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// The target executable could not be found in the executable search order.
    #[error("failed to find executable '{}' (searched: {searched})", .path.display())]
    ExecutableNotFound {
        /// The path as requested.
        path: PathBuf,

        /// Where the search looked, as reported by the platform.
        searched: String,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// The operating system refused to create the process.
    #[error("failed to create process '{}'", .path.display())]
    ProcessCreateFailed {
        /// The resolved executable path.
        path: PathBuf,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// The operating system refused to apply the affinity mask to the new process.
    #[error("failed to apply affinity mask {mask} to process {process_id}")]
    AffinityApplyFailed {
        /// The mask that was being applied.
        mask: AffinityMask,

        /// The process that was terminated as a result.
        process_id: u32,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// The operating system refused to start the primary thread of the new process.
    #[error("failed to resume process {process_id}")]
    ResumeFailed {
        /// The process that was terminated as a result.
        process_id: u32,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// Waiting for the launched process to exit failed.
    #[error("failed to wait for process {process_id} to exit")]
    WaitFailed {
        /// The process that was terminated as a result.
        process_id: u32,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// The command line or profile options do not describe a valid request.
    #[error("{0}")]
    InvalidOptions(String),

    /// A launch profile could not be read or parsed.
    #[error("invalid launch profile '{}': {problem}", .path.display())]
    InvalidProfile {
        /// The profile that was being loaded.
        path: PathBuf,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// The log file could not be opened.
    #[error("failed to open log file '{}'", .path.display())]
    LogFile {
        /// The log file path.
        path: PathBuf,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },
}

/// A specialized `Result` type for launcher operations, returning the crate's [`Error`] type as the
/// error value.
pub type Result<T> = std::result::Result<T, Error>;
