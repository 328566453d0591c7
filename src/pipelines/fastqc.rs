use log::info;

use crate::config::defs::{PipelineError, RunConfig, FILE_ENDING_FASTQC_HTML};
use crate::pipelines::stage::{run_stage, StageJob, StageOutcome};
use crate::utils::command::{fastqc, CommandInvocation, CommandRunner};
use crate::utils::file::list_matching;
use crate::utils::paths::{PathResolver, Stage};


/// Runs FastQC once over all reads of `stage` for one species, unless a report already exists.
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
/// * `runner` - Command runner.
/// * `species` - Configured species ID.
/// * `stage` - Which reads to check.
///
/// # Returns
/// Result<StageOutcome, PipelineError>
pub async fn fastqc_for_stage<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    species: &str,
    stage: Stage,
) -> Result<StageOutcome, PipelineError> {
    info!("Running fastqc for species {} {} data", species, stage);

    let resolver = PathResolver::new(&config.settings);
    let reads_folder = resolver.reads_folder(species, stage)?;
    let output_folder = resolver.fastqc_folder(species, stage)?;
    let reads = list_matching(&reads_folder, &stage.input_pattern())?;

    let job = StageJob {
        name: format!("fastqc for {}", stage),
        species: species.to_string(),
        output_folder,
        marker_pattern: format!("*{}", FILE_ENDING_FASTQC_HTML),
        inputs: reads,
    };

    let threads = config.settings.fastqc_threads();
    let program = &config.settings.programs.fastqc;
    run_stage(config, runner, &job, || {
        let args = fastqc::arg_generator(&job.output_folder, threads, &job.inputs);
        Ok(vec![
            CommandInvocation::new(program)
                .args(args)
                .description(format!("fastqc for {} files of species {} ({} threads)", job.inputs.len(), species, threads)),
        ])
    })
    .await
}
