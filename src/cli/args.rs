use clap::Parser;
use crate::config::defs::Rerun;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "adna-pipelines", version, about = "Per-species orchestration of aDNA read processing and QC tools")]
pub struct Arguments {

    #[arg(short, long, help = "Module to run: fastqc, fastqc_raw, fastqc_adapter_removed, fastqc_quality_filtered, fastqc_duplicates_removed, adapter_removal, quality_filtering, duplicates_removal, full, check_sorted, r_script, check_tools")]
    pub module: String,

    #[arg(short = 'c', long = "config", default_value = "config.json")]
    pub config: String,

    #[arg(short = 's', long = "species", help = "Restrict the run to a single configured species ID")]
    pub species: Option<String>,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(long, default_value = "none", value_enum, help = "none: skip stages with existing outputs; stale: also rerun if inputs or arguments changed; all: always run")]
    pub rerun: Rerun,

    #[arg(long, default_value_t = false, help = "Treat any stderr output of a successful tool as a failure")]
    pub strict_stderr: bool,

    #[arg(short = 'f', long = "file", help = "SAM/BAM file for check_sorted")]
    pub file: Option<String>,

    #[arg(long, help = "R script name for r_script")]
    pub script: Option<String>,

    #[arg(long, help = "Processing folder whose plots directory holds the R script")]
    pub processing_folder: Option<String>,

    #[arg(last = true, help = "Arguments passed on to the R script")]
    pub script_args: Vec<String>,
}
