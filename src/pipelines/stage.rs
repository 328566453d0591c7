// src/pipelines/stage.rs: Idempotent execution of one stage for one species

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::defs::{PipelineError, Rerun, RunConfig, STAGE_MANIFEST};
use crate::utils::command::{CommandInvocation, CommandRunner};
use crate::utils::file::list_matching;


/// Terminal state of a stage driver call.
#[derive(Debug)]
pub enum StageOutcome {
    /// Completion markers were found; nothing was run.
    Skipped,
    /// No input files; nothing was run.
    EmptyInput,
    Completed,
    /// An external tool failed. Logged, not propagated.
    Failed(PipelineError),
}


/// Everything a stage driver resolved before deciding whether to run.
#[derive(Debug, Clone)]
pub struct StageJob {
    /// Human readable stage name, e.g. `fastqc for raw`.
    pub name: String,
    pub species: String,
    pub output_folder: PathBuf,
    /// Glob pattern whose matches in `output_folder` mean the stage already ran.
    pub marker_pattern: String,
    pub inputs: Vec<PathBuf>,
}


/// Record of a completed stage, written to its output folder. Lets `--rerun stale` tell
/// outputs of the current inputs and arguments apart from leftovers of an earlier run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageManifest {
    pub stage: String,
    pub inputs: Vec<String>,
    pub fingerprint: String,
}

impl StageManifest {
    pub fn new(job: &StageJob, invocations: &[CommandInvocation]) -> Self {
        let mut inputs: Vec<String> = job.inputs.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        inputs.sort();
        let command_lines: Vec<String> = invocations.iter().map(CommandInvocation::command_line).collect();
        Self {
            stage: job.name.clone(),
            inputs,
            fingerprint: format!("{:016x}", fxhash::hash64(&command_lines)),
        }
    }

    pub fn load(folder: &Path) -> Option<Self> {
        let text = fs::read_to_string(folder.join(STAGE_MANIFEST)).ok()?;
        match serde_json::from_str(&text) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Ignoring unreadable manifest in {}: {}", folder.display(), e);
                None
            }
        }
    }

    pub fn save(&self, folder: &Path) -> Result<(), PipelineError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::IOError(e.to_string()))?;
        fs::write(folder.join(STAGE_MANIFEST), text)?;
        Ok(())
    }
}


/// Runs a stage unless it is already done.
///
/// The output folder is created if needed and searched for completion markers first; with the
/// default rerun policy any marker means the stage is skipped. A stage without inputs is skipped
/// with a warning. Otherwise the planned invocations run in order. A tool failure is logged and
/// returned as `StageOutcome::Failed`; configuration and filesystem errors are returned as `Err`.
///
/// # Arguments
///
/// * `config` - Run configuration (rerun policy, stderr strictness).
/// * `runner` - Executes the planned invocations.
/// * `job` - Resolved folders and inputs.
/// * `plan` - Builds the invocations; only called when they are needed.
///
/// # Returns
/// Result<StageOutcome, PipelineError>
pub async fn run_stage<R, P>(
    config: &RunConfig,
    runner: &R,
    job: &StageJob,
    plan: P,
) -> Result<StageOutcome, PipelineError>
where
    R: CommandRunner,
    P: FnOnce() -> Result<Vec<CommandInvocation>, PipelineError>,
{
    fs::create_dir_all(&job.output_folder)?;
    let markers = list_matching(&job.output_folder, &job.marker_pattern)?;
    debug!("{} completion markers for {} in {}", markers.len(), job.name, job.output_folder.display());

    if !markers.is_empty() && config.rerun() == Rerun::None {
        info!("{} already exists for species {}. Skipping.", job.name, job.species);
        return Ok(StageOutcome::Skipped);
    }

    if job.inputs.is_empty() {
        warn!("No input found for {} for species {}. Skipping.", job.name, job.species);
        return Ok(StageOutcome::EmptyInput);
    }

    let invocations = plan_invocations(config, job, plan)?;
    let manifest = StageManifest::new(job, &invocations);

    if !markers.is_empty() {
        if config.rerun() == Rerun::Stale && StageManifest::load(&job.output_folder).as_ref() == Some(&manifest) {
            info!("{} is up to date for species {}. Skipping.", job.name, job.species);
            return Ok(StageOutcome::Skipped);
        }
        info!("{} for species {} exists but is rerun ({:?}).", job.name, job.species, config.rerun());
    }

    info!("Running {} on {} files for species {}", job.name, job.inputs.len(), job.species);
    for invocation in &invocations {
        if let Err(e) = runner.run(invocation).await {
            if e.is_tool_failure() {
                error!("Failed to run {} for species {}: {}", job.name, job.species, e);
                return Ok(StageOutcome::Failed(e));
            }
            return Err(e);
        }
    }

    manifest.save(&job.output_folder)?;
    info!("{} for species {} complete", job.name, job.species);
    Ok(StageOutcome::Completed)
}

fn plan_invocations<P>(config: &RunConfig, job: &StageJob, plan: P) -> Result<Vec<CommandInvocation>, PipelineError>
where
    P: FnOnce() -> Result<Vec<CommandInvocation>, PipelineError>,
{
    let invocations = plan()?;
    if invocations.is_empty() {
        return Err(PipelineError::InvalidConfig(format!("Nothing planned for {}", job.name)));
    }
    Ok(invocations
        .into_iter()
        .map(|invocation| invocation.strict(config.strict_stderr()))
        .collect())
}
