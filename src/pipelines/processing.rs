// src/pipelines/processing.rs: Read processing stages (adapter removal, quality filtering,
// duplicate removal). Each runs its tool once per sample.

use std::path::{Path, PathBuf};

use fxhash::FxHashSet;
use log::{info, warn};

use crate::config::defs::{PipelineError, RunConfig, FILE_ENDING_FASTP_HTML, FILE_ENDING_FASTP_JSON};
use crate::pipelines::stage::{run_stage, StageJob, StageOutcome};
use crate::utils::command::{fastp, seqkit, CommandInvocation, CommandRunner};
use crate::utils::file::{file_name, list_matching, list_reads, pair_reads, single_sample_below, strip_ending};
use crate::utils::paths::{PathResolver, Stage};


fn output_job(resolver: &PathResolver, species: &str, name: &str, output: Stage, inputs: Vec<PathBuf>) -> Result<StageJob, PipelineError> {
    Ok(StageJob {
        name: name.to_string(),
        species: species.to_string(),
        output_folder: resolver.reads_folder(species, output)?,
        marker_pattern: output.input_pattern(),
        inputs,
    })
}

fn sample_output(folder: &Path, sample: &str, ending: &str) -> PathBuf {
    folder.join(format!("{}{}", sample, ending))
}


/// Records the read output of one sample. Two samples resolving to the same output file is an
/// error, since the second fastp call would replace the first sample's reads.
fn claim_output(claimed: &mut FxHashSet<PathBuf>, output: &Path, input: &Path) -> Result<(), PipelineError> {
    if !claimed.insert(output.to_path_buf()) {
        return Err(PipelineError::InvalidConfig(format!(
            "{} would overwrite the output {} of another sample",
            input.display(),
            output.display()
        )));
    }
    Ok(())
}


/// Removes adapters from the raw reads of one species with fastp.
///
/// Paired-end samples (`*_R1*`/`*_R2*` mates) are merged into a single collapsed read file per
/// sample. Every other `.fastq.gz` file is trimmed as single-end. Both are searched below the raw
/// reads folder, and samples from subfolders carry the subfolder names so their outputs stay apart.
/// Adapter sequences come from the species configuration, falling back to the global ones.
///
/// # Returns
/// Result<StageOutcome, PipelineError>
pub async fn adapter_removal<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    species: &str,
) -> Result<StageOutcome, PipelineError> {
    info!("Running adapter removal for species {}", species);

    let settings = &config.settings;
    let resolver = PathResolver::new(settings);
    let raw_folder = resolver.reads_folder(species, Stage::Raw)?;
    let undetermined = &settings.folders.undetermined;

    let pairs = pair_reads(&raw_folder, undetermined)?;
    let paired: FxHashSet<&Path> = pairs.iter().flat_map(|pair| [pair.r1.as_path(), pair.r2.as_path()]).collect();
    let singles: Vec<PathBuf> = list_reads(&raw_folder, undetermined)?
        .into_iter()
        .filter(|file| !paired.contains(file.as_path()))
        .collect();
    if !pairs.is_empty() && !singles.is_empty() {
        let names: Vec<String> = singles.iter().map(|file| file_name(file)).collect();
        warn!(
            "{} raw read files of species {} have no R1/R2 mate and are trimmed as single-end: {}",
            singles.len(),
            species,
            names.join(", ")
        );
    }

    let inputs: Vec<PathBuf> = pairs
        .iter()
        .flat_map(|pair| [pair.r1.clone(), pair.r2.clone()])
        .chain(singles.iter().cloned())
        .collect();
    let job = output_job(&resolver, species, "adapter removal", Stage::AdapterRemoved, inputs)?;

    let threads = settings.adapter_removal_threads();
    let program = &settings.programs.fastp;
    run_stage(config, runner, &job, || {
        let (r1_adapter, r2_adapter) = settings.adapter_sequence(species)?;
        let out = &job.output_folder;
        let ending = Stage::AdapterRemoved.file_ending();
        let mut claimed = FxHashSet::default();

        let mut invocations = Vec::new();
        for pair in &pairs {
            let sample = pair.sample_below(&raw_folder);
            let merged_out = sample_output(out, &sample, ending);
            claim_output(&mut claimed, &merged_out, &pair.r1)?;
            let args = fastp::merge_pair_args(
                &pair.r1,
                &pair.r2,
                &merged_out,
                (&r1_adapter, &r2_adapter),
                threads,
                fastp::Reports {
                    json: &sample_output(out, &sample, FILE_ENDING_FASTP_JSON),
                    html: &sample_output(out, &sample, FILE_ENDING_FASTP_HTML),
                },
            );
            invocations.push(CommandInvocation::new(program)
                .args(args)
                .description(format!("adapter removal for {} of species {}", sample, species)));
        }
        for single in &singles {
            let sample = single_sample_below(&raw_folder, single);
            let output = sample_output(out, &sample, ending);
            claim_output(&mut claimed, &output, single)?;
            let args = fastp::single_args(
                single,
                &output,
                &r1_adapter,
                threads,
                fastp::Reports {
                    json: &sample_output(out, &sample, FILE_ENDING_FASTP_JSON),
                    html: &sample_output(out, &sample, FILE_ENDING_FASTP_HTML),
                },
            );
            invocations.push(CommandInvocation::new(program)
                .args(args)
                .description(format!("adapter removal for {} of species {}", sample, species)));
        }
        Ok(invocations)
    })
    .await
}


/// Filters adapter-removed reads by base quality and read length with fastp.
pub async fn quality_filtering<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    species: &str,
) -> Result<StageOutcome, PipelineError> {
    info!("Running quality filtering for species {}", species);

    let settings = &config.settings;
    let resolver = PathResolver::new(settings);
    let input_folder = resolver.reads_folder(species, Stage::AdapterRemoved)?;
    let inputs = list_matching(&input_folder, &Stage::AdapterRemoved.input_pattern())?;
    let job = output_job(&resolver, species, "quality filtering", Stage::QualityFiltered, inputs)?;

    let threads = settings.quality_filtering_threads();
    let (min_quality, min_length) = (settings.min_quality(), settings.min_length());
    let program = &settings.programs.fastp;
    run_stage(config, runner, &job, || {
        let out = &job.output_folder;
        Ok(job.inputs
            .iter()
            .map(|input| {
                let sample = strip_ending(&file_name(input), Stage::AdapterRemoved.file_ending());
                let args = fastp::quality_filter_args(
                    input,
                    &sample_output(out, &sample, Stage::QualityFiltered.file_ending()),
                    min_quality,
                    min_length,
                    threads,
                    fastp::Reports {
                        json: &sample_output(out, &sample, FILE_ENDING_FASTP_JSON),
                        html: &sample_output(out, &sample, FILE_ENDING_FASTP_HTML),
                    },
                );
                CommandInvocation::new(program)
                    .args(args)
                    .description(format!("quality filtering for {} of species {}", sample, species))
            })
            .collect())
    })
    .await
}


/// Removes duplicate reads from quality-filtered reads with `seqkit rmdup`.
pub async fn duplicates_removal<R: CommandRunner>(
    config: &RunConfig,
    runner: &R,
    species: &str,
) -> Result<StageOutcome, PipelineError> {
    info!("Running duplicates removal for species {}", species);

    let settings = &config.settings;
    let resolver = PathResolver::new(settings);
    let input_folder = resolver.reads_folder(species, Stage::QualityFiltered)?;
    let inputs = list_matching(&input_folder, &Stage::QualityFiltered.input_pattern())?;
    let job = output_job(&resolver, species, "duplicates removal", Stage::DuplicatesRemoved, inputs)?;

    let threads = settings.duplicates_removal_threads();
    let program = &settings.programs.seqkit;
    run_stage(config, runner, &job, || {
        Ok(job.inputs
            .iter()
            .map(|input| {
                let sample = strip_ending(&file_name(input), Stage::QualityFiltered.file_ending());
                let output = sample_output(&job.output_folder, &sample, Stage::DuplicatesRemoved.file_ending());
                CommandInvocation::new(program)
                    .args(seqkit::rmdup_args(input, &output, threads))
                    .description(format!("duplicates removal for {} of species {}", sample, species))
            })
            .collect())
    })
    .await
}
