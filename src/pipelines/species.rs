// src/pipelines/species.rs: Applies pipeline steps across configured species

use std::fmt;

use log::{error, info, warn};

use crate::config::defs::{PipelineError, RunConfig};
use crate::pipelines::fastqc::fastqc_for_stage;
use crate::pipelines::processing::{adapter_removal, duplicates_removal, quality_filtering};
use crate::pipelines::stage::StageOutcome;
use crate::utils::command::CommandRunner;
use crate::utils::paths::Stage;


/// A single stage driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fastqc(Stage),
    AdapterRemoval,
    QualityFiltering,
    DuplicatesRemoval,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Fastqc(stage) => write!(f, "fastqc {}", stage),
            Step::AdapterRemoval => write!(f, "adapter removal"),
            Step::QualityFiltering => write!(f, "quality filtering"),
            Step::DuplicatesRemoval => write!(f, "duplicates removal"),
        }
    }
}

/// FastQC on every read stage.
pub const QC_STEPS: [Step; 4] = [
    Step::Fastqc(Stage::Raw),
    Step::Fastqc(Stage::AdapterRemoved),
    Step::Fastqc(Stage::QualityFiltered),
    Step::Fastqc(Stage::DuplicatesRemoved),
];

/// Processing chain with a QC step after every stage.
pub const FULL_STEPS: [Step; 7] = [
    Step::Fastqc(Stage::Raw),
    Step::AdapterRemoval,
    Step::Fastqc(Stage::AdapterRemoved),
    Step::QualityFiltering,
    Step::Fastqc(Stage::QualityFiltered),
    Step::DuplicatesRemoval,
    Step::Fastqc(Stage::DuplicatesRemoved),
];


pub async fn run_step<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    species: &str,
    step: Step,
) -> Result<StageOutcome, PipelineError> {
    match step {
        Step::Fastqc(stage) => fastqc_for_stage(config, runner, species, stage).await,
        Step::AdapterRemoval => adapter_removal(config, runner, species).await,
        Step::QualityFiltering => quality_filtering(config, runner, species).await,
        Step::DuplicatesRemoval => duplicates_removal(config, runner, species).await,
    }
}


/// A step whose external tool failed.
#[derive(Debug)]
pub struct StepFailure {
    pub species: String,
    pub step: Step,
    pub error: PipelineError,
}

/// Outcome counts over all species and steps of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub skipped: usize,
    pub empty: usize,
    pub succeeded: usize,
    pub failures: Vec<StepFailure>,
}

impl RunSummary {
    pub fn record(&mut self, species: &str, step: Step, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Skipped => self.skipped += 1,
            StageOutcome::EmptyInput => self.empty += 1,
            StageOutcome::Completed => self.succeeded += 1,
            StageOutcome::Failed(error) => self.failures.push(StepFailure {
                species: species.to_string(),
                step,
                error,
            }),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn log(&self) {
        info!(
            "Summary: {} succeeded, {} skipped, {} without input, {} failed",
            self.succeeded,
            self.skipped,
            self.empty,
            self.failures.len()
        );
        for failure in &self.failures {
            error!("{} failed for species {}: {}", failure.step, failure.species, failure.error);
        }
    }
}


/// Species selected for the run: the `--species` filter if given, otherwise all configured ones.
pub fn selected_species(config: &RunConfig) -> Result<Vec<String>, PipelineError> {
    match &config.args.species {
        Some(species) if !config.settings.is_species(species) => Err(PipelineError::InvalidSpecies(species.clone())),
        Some(species) => Ok(vec![species.clone()]),
        None => Ok(config.settings.species_ids().map(str::to_string).collect()),
    }
}


/// Runs `steps` in order for each selected species, one species at a time.
///
/// Tool failures are collected in the summary and the run moves on to the next step.
/// Configuration and filesystem errors abort the whole run.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `runner` - Command runner.
/// * `steps` - Ordered stage drivers to apply per species.
///
/// # Returns
/// Result<RunSummary, PipelineError>
pub async fn run_for_all_species<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    steps: &[Step],
) -> Result<RunSummary, PipelineError> {
    let species_list = selected_species(config)?;
    if species_list.is_empty() {
        warn!("No species configured");
    }

    let mut summary = RunSummary::default();
    for species in &species_list {
        let name = config.settings.species_name(species)?;
        info!("Processing species {} ({})", species, name);
        for &step in steps {
            let outcome = run_step(config, runner, species, step).await?;
            summary.record(species, step, outcome);
        }
    }
    Ok(summary)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use crate::cli::Arguments;
    use crate::config::settings::Settings;
    use crate::utils::command::testing::RecordingRunner;
    use tempfile::TempDir;

    fn run_config(root: &Path, species: Option<&str>) -> RunConfig {
        let json = format!(
            r#"{{ "folders": {{ "root": {:?} }},
                 "species": {{ "mouse": {{ "name": "Mus musculus" }}, "bear": {{ "name": "Ursus spelaeus" }} }} }}"#,
            root.to_string_lossy()
        );
        RunConfig {
            cwd: root.to_path_buf(),
            settings: Settings::from_json_str(&json).unwrap(),
            args: Arguments { species: species.map(str::to_string), ..Default::default() },
        }
    }

    fn raw_reads(root: &Path, species: &str, names: &[&str]) -> anyhow::Result<()> {
        let folder = root.join(species).join("raw/reads");
        fs::create_dir_all(&folder)?;
        for name in names {
            fs::write(folder.join(name), "")?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_species() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = run_config(dir.path(), None);
        raw_reads(dir.path(), "bear", &["b.fastq.gz"])?;
        raw_reads(dir.path(), "mouse", &["m.fastq.gz"])?;

        let runner = RecordingRunner::with_replies(vec![Err(PipelineError::CommandExecution {
            program: "fastqc".to_string(),
            code: Some(2),
            stderr: String::new(),
        })]);
        let summary = run_for_all_species(&config, &runner, &[Step::Fastqc(Stage::Raw)]).await?;

        assert_eq!(runner.calls().len(), 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].species, "bear");
        assert!(summary.has_failures());
        Ok(())
    }

    #[tokio::test]
    async fn test_config_error_aborts() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = run_config(dir.path(), None);
        raw_reads(dir.path(), "mouse", &["m.fastq.gz"])?;

        let runner = RecordingRunner::default();
        let result = run_for_all_species(&config, &runner, &[Step::Fastqc(Stage::Raw)]).await;
        assert!(matches!(result, Err(PipelineError::InvalidFolder(_))), "bear has no raw reads folder");
        assert!(runner.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_species_filter() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        raw_reads(dir.path(), "mouse", &["m.fastq.gz"])?;

        let config = run_config(dir.path(), Some("mouse"));
        let runner = RecordingRunner::default();
        let summary = run_for_all_species(&config, &runner, &[Step::Fastqc(Stage::Raw)]).await?;
        assert_eq!(summary.succeeded, 1);

        let config = run_config(dir.path(), Some("cat"));
        let result = run_for_all_species(&config, &runner, &[Step::Fastqc(Stage::Raw)]).await;
        assert!(matches!(result, Err(PipelineError::InvalidSpecies(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_full_pipeline_order() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        raw_reads(dir.path(), "mouse", &["m_R1.fastq.gz", "m_R2.fastq.gz"])?;
        let config = run_config(dir.path(), Some("mouse"));
        let settings_json = format!(
            r#"{{ "folders": {{ "root": {:?} }},
                 "species": {{ "mouse": {{ "name": "Mus musculus" }} }},
                 "processing": {{ "adapter_removal": {{ "adapters": {{ "r1": "AAAA" }} }} }} }}"#,
            dir.path().to_string_lossy()
        );
        let config = RunConfig { settings: Settings::from_json_str(&settings_json)?, ..config };

        let runner = RecordingRunner::default();
        let summary = run_for_all_species(&config, &runner, &FULL_STEPS).await?;

        // The recording runner writes nothing, so downstream stages find no input.
        let programs: Vec<String> = runner.calls().iter().map(|c| c.tag()).collect();
        assert_eq!(programs, vec!["fastqc", "fastp"]);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.empty, 5);
        Ok(())
    }
}
