use std::path::PathBuf;
use thiserror::Error;
use crate::cli::Arguments;
use crate::config::settings::Settings;

// External software
pub const FASTQC_TAG: &str = "fastqc";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const RSCRIPT_TAG: &str = "Rscript";
pub const FASTP_TAG: &str = "fastp";
pub const SEQKIT_TAG: &str = "seqkit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    View,
}

impl SamtoolsSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamtoolsSubcommand::View => "view",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeqkitSubcommand {
    Rmdup,
}

impl SeqkitSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeqkitSubcommand::Rmdup => "rmdup",
        }
    }
}

// File endings
pub const FILE_ENDING_FASTQ_GZ: &str = ".fastq.gz";
pub const FILE_ENDING_ADAPTER_REMOVED_FASTQ_GZ: &str = "_adapter_removed.fastq.gz";
pub const FILE_ENDING_QUALITY_FILTERED_FASTQ_GZ: &str = "_quality_filtered.fastq.gz";
pub const FILE_ENDING_DUPLICATES_REMOVED_FASTQ_GZ: &str = "_duplicates_removed.fastq.gz";
pub const FILE_ENDING_FASTQC_HTML: &str = "_fastqc.html";
pub const FILE_ENDING_FASTP_JSON: &str = "_fastp.json";
pub const FILE_ENDING_FASTP_HTML: &str = "_fastp.html";


// Paired-end file patterns
pub const FILE_PATTERN_R1_FASTQ_GZ: &str = "*_R1*.fastq.gz";
pub const FILE_PATTERN_R2_FASTQ_GZ: &str = "*_R2*.fastq.gz";

// Static Filenames
pub const STAGE_MANIFEST: &str = ".stage_manifest.json";

// Static Parameters
pub const DEFAULT_THREADS: usize = 1;
pub const DEFAULT_MIN_QUALITY: u8 = 20;
pub const DEFAULT_MIN_LENGTH: usize = 30;


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid species ID: {0}")]
    InvalidSpecies(String),

    #[error("Invalid folder: {}", .0.display())]
    InvalidFolder(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{program} failed with exit code {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "none (terminated by signal)".to_string()))]
    CommandExecution {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to execute {tool}: {error}")]
    ToolExecution {
        tool: String,
        error: String,
    },

    #[error("Unpaired reads: {0}")]
    UnpairedReads(String),

    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Adapter sequence not found for species: {0}")]
    AdapterNotFound(String),

    #[error("I/O error: {0}")]
    IOError(String),
}

impl PipelineError {
    /// True for failures of an external tool, which stage drivers log and swallow.
    /// Everything else is a configuration or filesystem precondition and aborts the run.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, PipelineError::CommandExecution { .. } | PipelineError::ToolExecution { .. })
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


/// How to treat stages whose outputs already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Rerun {
    /// Skip a stage as soon as any completion marker is present.
    #[default]
    None,
    /// Skip only if the stage manifest matches the current inputs and arguments.
    Stale,
    /// Run every stage, ignoring existing outputs.
    All,
}


pub struct RunConfig {
    pub cwd: PathBuf,
    pub settings: Settings,
    pub args: Arguments,
}

impl RunConfig {
    pub fn rerun(&self) -> Rerun {
        self.args.rerun
    }

    pub fn strict_stderr(&self) -> bool {
        self.args.strict_stderr
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_execution_message() {
        let error = PipelineError::CommandExecution {
            program: "fastqc".to_string(),
            code: Some(2),
            stderr: "bad input".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("fastqc failed with exit code 2"));
        assert!(msg.contains("bad input"));
        assert!(error.is_tool_failure());
    }

    #[test]
    fn test_signal_terminated_message() {
        let error = PipelineError::CommandExecution {
            program: "seqkit".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(format!("{error}").contains("terminated by signal"));
    }

    #[test]
    fn test_config_errors_are_not_tool_failures() {
        assert!(!PipelineError::InvalidSpecies("cat".to_string()).is_tool_failure());
        assert!(!PipelineError::InvalidFolder(PathBuf::from("/nope")).is_tool_failure());
        assert!(!PipelineError::UnpairedReads("x".to_string()).is_tool_failure());
    }
}
