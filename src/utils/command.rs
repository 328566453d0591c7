/// Functions and structs for building command-line arguments and running external tools

use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::config::defs::PipelineError;


/// One external tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Escalate non-empty stderr of a successful run to an error.
    pub strict: bool,
    pub description: Option<String>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            strict: false,
            description: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Program name used to tag log lines: the file name of the program path.
    pub fn tag(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}


/// Executes command invocations. The seam between stage drivers and real processes.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs the invocation to completion.
    ///
    /// # Returns
    /// Trimmed stdout on success.
    async fn run(&self, invocation: &CommandInvocation) -> Result<String, PipelineError>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<String, PipelineError> {
        run_command(invocation).await
    }
}


/// Runs an external program and waits for it, with no timeout.
///
/// Every stdout line is logged as `[program] line` while the program runs. Stderr is collected;
/// after a successful exit its lines are logged as warnings, or as errors with a failure when
/// the invocation is strict.
///
/// # Arguments
///
/// * `invocation` - Program, arguments, working directory and stderr policy.
///
/// # Returns
/// Trimmed stdout, or `CommandExecution` carrying the exit code and stderr.
pub async fn run_command(invocation: &CommandInvocation) -> Result<String, PipelineError> {
    let tag = invocation.tag();

    match &invocation.description {
        Some(description) => info!("Running: {}", description),
        None => info!("Running: {}", invocation.command_line()),
    }
    debug!("Command line: {}", invocation.command_line());

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &invocation.cwd {
        debug!("Working directory: {}", cwd.display());
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| PipelineError::ToolExecution {
        tool: tag.clone(),
        error: format!("Failed to spawn: {}. Is {} installed?", e, tag),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| PipelineError::ToolExecution {
        tool: tag.clone(),
        error: "Failed to capture stdout".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| PipelineError::ToolExecution {
        tool: tag.clone(),
        error: "Failed to capture stderr".to_string(),
    })?;

    let (stdout_lines, stderr_lines, status) = tokio::join!(
        read_lines(stdout, Some(&tag)),
        read_lines(stderr, None),
        child.wait(),
    );
    let stdout_lines = stdout_lines?;
    let stderr_lines = stderr_lines?;
    let status = status?;
    let stderr_text = stderr_lines.join("\n");

    if !status.success() {
        for line in &stderr_lines {
            error!("[{}] {}", tag, line.trim());
        }
        return Err(PipelineError::CommandExecution {
            program: tag,
            code: status.code(),
            stderr: stderr_text,
        });
    }

    if !stderr_lines.is_empty() {
        if invocation.strict {
            error!("[{}] Command failed with error:", tag);
            for line in &stderr_lines {
                error!("[{}] {}", tag, line.trim());
            }
            return Err(PipelineError::CommandExecution {
                program: tag,
                code: status.code(),
                stderr: stderr_text,
            });
        }
        for line in &stderr_lines {
            warn!("[{}] {}", tag, line.trim());
        }
    }

    info!("{} completed successfully", tag);
    Ok(stdout_lines.join("\n").trim().to_string())
}

/// Reads a child stream to the end, line by line. Lines are logged under `log_tag` as they come.
async fn read_lines<R: AsyncRead + Unpin>(stream: R, log_tag: Option<&str>) -> std::io::Result<Vec<String>> {
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buffer).trim_end_matches(['\n', '\r']).to_string();
        if let Some(tag) = log_tag {
            info!("[{}] {}", tag, line.trim());
        }
        lines.push(line);
    }
    Ok(lines)
}


/// Resolves a configured program to an executable on disk or on PATH.
pub fn find_program(program: &Path) -> Result<PathBuf, PipelineError> {
    which::which(program).map_err(|e| PipelineError::ToolExecution {
        tool: program.to_string_lossy().into_owned(),
        error: format!("Could not find executable: {}", e),
    })
}


pub mod fastqc {
    use std::path::{Path, PathBuf};

    /// `-o <output_folder> -t <threads> <reads...>`
    pub fn arg_generator(output_folder: &Path, threads: usize, reads: &[PathBuf]) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-o".to_string());
        args_vec.push(output_folder.to_string_lossy().to_string());
        args_vec.push("-t".to_string());
        args_vec.push(threads.to_string());
        for read in reads {
            args_vec.push(read.to_string_lossy().to_string());
        }
        args_vec
    }
}

pub mod fastp {
    use std::path::Path;

    /// Report files written next to the reads, so a sample's JSON/HTML report never
    /// collides with another's.
    pub struct Reports<'a> {
        pub json: &'a Path,
        pub html: &'a Path,
    }

    /// Paired-end adapter removal with read merging, as used for short aDNA inserts.
    pub fn merge_pair_args(
        r1: &Path,
        r2: &Path,
        merged_out: &Path,
        adapters: (&Option<String>, &Option<String>),
        threads: usize,
        reports: Reports,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-i".to_string());
        args_vec.push(r1.to_string_lossy().to_string());
        args_vec.push("-I".to_string());
        args_vec.push(r2.to_string_lossy().to_string());
        args_vec.push("--merge".to_string());
        args_vec.push("--merged_out".to_string());
        args_vec.push(merged_out.to_string_lossy().to_string());
        if let Some(adapter) = adapters.0 {
            args_vec.push("--adapter_sequence".to_string());
            args_vec.push(adapter.clone());
        }
        if let Some(adapter) = adapters.1 {
            args_vec.push("--adapter_sequence_r2".to_string());
            args_vec.push(adapter.clone());
        }
        push_common(&mut args_vec, threads, reports);
        args_vec
    }

    /// Single-end adapter removal.
    pub fn single_args(input: &Path, output: &Path, adapter: &Option<String>, threads: usize, reports: Reports) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-i".to_string());
        args_vec.push(input.to_string_lossy().to_string());
        args_vec.push("-o".to_string());
        args_vec.push(output.to_string_lossy().to_string());
        if let Some(adapter) = adapter {
            args_vec.push("--adapter_sequence".to_string());
            args_vec.push(adapter.clone());
        }
        push_common(&mut args_vec, threads, reports);
        args_vec
    }

    /// Quality and length filtering only; adapter trimming is disabled (`-A`).
    pub fn quality_filter_args(
        input: &Path,
        output: &Path,
        min_quality: u8,
        min_length: usize,
        threads: usize,
        reports: Reports,
    ) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-i".to_string());
        args_vec.push(input.to_string_lossy().to_string());
        args_vec.push("-o".to_string());
        args_vec.push(output.to_string_lossy().to_string());
        args_vec.push("-A".to_string());
        args_vec.push("-q".to_string());
        args_vec.push(min_quality.to_string());
        args_vec.push("-l".to_string());
        args_vec.push(min_length.to_string());
        push_common(&mut args_vec, threads, reports);
        args_vec
    }

    fn push_common(args_vec: &mut Vec<String>, threads: usize, reports: Reports) {
        args_vec.push("-w".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("-j".to_string());
        args_vec.push(reports.json.to_string_lossy().to_string());
        args_vec.push("-h".to_string());
        args_vec.push(reports.html.to_string_lossy().to_string());
    }
}

pub mod seqkit {
    use std::path::Path;
    use crate::config::defs::SeqkitSubcommand;

    /// Sequence-based duplicate removal.
    pub fn rmdup_args(input: &Path, output: &Path, threads: usize) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push(SeqkitSubcommand::Rmdup.as_str().to_string());
        args_vec.push("-s".to_string());
        args_vec.push("-j".to_string());
        args_vec.push(threads.to_string());
        args_vec.push("-o".to_string());
        args_vec.push(output.to_string_lossy().to_string());
        args_vec.push(input.to_string_lossy().to_string());
        args_vec
    }
}

pub mod samtools {
    use std::path::Path;
    use log::error;
    use crate::config::defs::SamtoolsSubcommand;
    use super::{CommandInvocation, CommandRunner};

    pub fn header_args(file: &Path) -> Vec<String> {
        vec![
            SamtoolsSubcommand::View.as_str().to_string(),
            "-H".to_string(),
            file.to_string_lossy().to_string(),
        ]
    }

    /// True if an `@HD` line declares `SO:coordinate`.
    pub fn header_is_coordinate_sorted(header: &str) -> bool {
        header
            .lines()
            .any(|line| line.starts_with("@HD") && line.contains("SO:coordinate"))
    }

    /// Checks whether a SAM/BAM file is sorted by coordinate, reading its header with
    /// `samtools view -H`. Any failure to read the header counts as unsorted.
    pub async fn is_sam_file_sorted<R: CommandRunner>(runner: &R, samtools: &Path, file: &Path) -> bool {
        let invocation = CommandInvocation::new(samtools)
            .args(header_args(file))
            .description(format!("samtools header of {}", file.display()));
        match runner.run(&invocation).await {
            Ok(header) => header_is_coordinate_sorted(&header),
            Err(e) => {
                error!("Error reading header: {}", e);
                false
            }
        }
    }
}

pub mod rscript {
    use std::path::{Path, PathBuf};
    use crate::config::defs::PipelineError;
    use crate::utils::paths::PathResolver;
    use super::{CommandInvocation, CommandRunner};

    /// Locates `script_name` in the plots folder of `processing_folder`.
    pub fn get_r_script(resolver: &PathResolver, script_name: &str, processing_folder: &str) -> Result<PathBuf, PipelineError> {
        let script = resolver.scripts_plots_folder(processing_folder).join(script_name);
        if !script.is_file() {
            return Err(PipelineError::MissingFile(script));
        }
        Ok(script)
    }

    /// `Rscript <script> <args...>`
    pub async fn call_r_script<R: CommandRunner>(
        runner: &R,
        rscript: &Path,
        script: &Path,
        args: &[String],
        strict: bool,
    ) -> Result<String, PipelineError> {
        if !script.is_file() {
            return Err(PipelineError::MissingFile(script.to_path_buf()));
        }
        let invocation = CommandInvocation::new(rscript)
            .args(std::iter::once(script.to_string_lossy().into_owned()).chain(args.iter().cloned()))
            .strict(strict)
            .description(format!("R script: {}", script.display()));
        runner.run(&invocation).await
    }
}
