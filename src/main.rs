use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{LevelFilter, debug, error, info};

use adna_pipelines::cli::{self, Arguments};
use adna_pipelines::config::defs::{PipelineError, RunConfig};
use adna_pipelines::config::settings::Settings;
use adna_pipelines::pipelines::species::{run_for_all_species, RunSummary, Step, FULL_STEPS, QC_STEPS};
use adna_pipelines::utils::command::{find_program, rscript, samtools, SystemRunner};
use adna_pipelines::utils::paths::{PathResolver, Stage};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();
    let args = cli::parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n aDNA pipelines\n-------------\n");

    let dir = env::current_dir()?;
    debug!("The current directory is {:?}", dir);

    let settings = match Settings::from_file(&config_path(&args, &dir)) {
        Ok(settings) => settings.anchored_at(&dir),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded {} species from {}", settings.species.len(), args.config);

    let module = args.module.clone();
    let run_config = RunConfig {
        cwd: dir,
        settings,
        args,
    };

    match run_module(&run_config, &module).await {
        Ok(Some(summary)) => {
            summary.log();
            if summary.has_failures() {
                error!("Run finished with failures at {} milliseconds.", run_start.elapsed().as_millis());
                std::process::exit(1);
            }
        }
        Ok(None) => {}
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


fn config_path(args: &Arguments, cwd: &Path) -> PathBuf {
    let path = PathBuf::from(&args.config);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}


/// Dispatches a module name. Stage modules return a summary; utility modules return None.
async fn run_module(run_config: &RunConfig, module: &str) -> Result<Option<RunSummary>, PipelineError> {
    let runner = SystemRunner;
    let steps: Vec<Step> = match module {
        "fastqc" => QC_STEPS.to_vec(),
        "fastqc_raw" => vec![Step::Fastqc(Stage::Raw)],
        "fastqc_adapter_removed" => vec![Step::Fastqc(Stage::AdapterRemoved)],
        "fastqc_quality_filtered" => vec![Step::Fastqc(Stage::QualityFiltered)],
        "fastqc_duplicates_removed" => vec![Step::Fastqc(Stage::DuplicatesRemoved)],
        "adapter_removal" => vec![Step::AdapterRemoval],
        "quality_filtering" => vec![Step::QualityFiltering],
        "duplicates_removal" => vec![Step::DuplicatesRemoval],
        "full" => FULL_STEPS.to_vec(),
        "check_sorted" => return check_sorted(run_config, &runner).await.map(|_| None),
        "r_script" => return r_script(run_config, &runner).await.map(|_| None),
        "check_tools" => return check_tools(run_config).map(|_| None),
        _ => return Err(PipelineError::InvalidConfig(format!("Invalid module: {}", module))),
    };

    info!("Running {} for {} step(s)", module, steps.len());
    run_for_all_species(run_config, &runner, &steps).await.map(Some)
}

async fn check_sorted(run_config: &RunConfig, runner: &SystemRunner) -> Result<(), PipelineError> {
    let file = run_config.args.file.as_ref()
        .ok_or_else(|| PipelineError::InvalidConfig("check_sorted requires --file".to_string()))?;
    let file = run_config.cwd.join(file);
    if !file.is_file() {
        return Err(PipelineError::MissingFile(file));
    }
    let sorted = samtools::is_sam_file_sorted(runner, &run_config.settings.programs.samtools, &file).await;
    info!("{} is {}sorted by coordinate", file.display(), if sorted { "" } else { "not " });
    Ok(())
}

async fn r_script(run_config: &RunConfig, runner: &SystemRunner) -> Result<(), PipelineError> {
    let args = &run_config.args;
    let (Some(script_name), Some(processing_folder)) = (&args.script, &args.processing_folder) else {
        return Err(PipelineError::InvalidConfig("r_script requires --script and --processing-folder".to_string()));
    };
    let resolver = PathResolver::new(&run_config.settings);
    let script = rscript::get_r_script(&resolver, script_name, processing_folder)?;
    rscript::call_r_script(runner, &run_config.settings.programs.rscript, &script, &args.script_args, run_config.strict_stderr()).await?;
    Ok(())
}

fn check_tools(run_config: &RunConfig) -> Result<(), PipelineError> {
    let programs = &run_config.settings.programs;
    let mut missing = Vec::new();
    for program in [&programs.fastqc, &programs.samtools, &programs.rscript, &programs.fastp, &programs.seqkit] {
        match find_program(program) {
            Ok(path) => info!("{} found at {}", program.display(), path.display()),
            Err(e) => {
                error!("{}", e);
                missing.push(program.to_string_lossy().into_owned());
            }
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::ToolExecution {
            tool: missing.join(", "),
            error: "not found".to_string(),
        });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_config(settings_json: &str, args: Arguments) -> RunConfig {
        RunConfig {
            cwd: PathBuf::from("/work"),
            settings: Settings::from_json_str(settings_json).unwrap(),
            args,
        }
    }

    #[test]
    fn test_config_path() {
        let args = Arguments { config: "conf/run.json".to_string(), ..Default::default() };
        assert_eq!(config_path(&args, Path::new("/work")), PathBuf::from("/work/conf/run.json"));
        let args = Arguments { config: "/etc/run.json".to_string(), ..Default::default() };
        assert_eq!(config_path(&args, Path::new("/work")), PathBuf::from("/etc/run.json"));
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let config = run_config("{}", Arguments::default());
        let result = run_module(&config, "align").await;
        assert!(matches!(result, Err(PipelineError::InvalidConfig(ref msg)) if msg.contains("align")));
    }

    #[tokio::test]
    async fn test_stage_module_without_species() -> anyhow::Result<()> {
        let config = run_config("{}", Arguments::default());
        let summary = run_module(&config, "full").await?.expect("stage modules return a summary");
        assert!(!summary.has_failures());
        assert_eq!(summary.succeeded + summary.skipped + summary.empty, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_check_sorted_arguments() -> anyhow::Result<()> {
        let config = run_config("{}", Arguments::default());
        assert!(matches!(run_module(&config, "check_sorted").await, Err(PipelineError::InvalidConfig(_))));

        let dir = TempDir::new()?;
        let missing = dir.path().join("missing.bam");
        let args = Arguments { file: Some(missing.to_string_lossy().into_owned()), ..Default::default() };
        let config = run_config("{}", args);
        assert!(matches!(run_module(&config, "check_sorted").await, Err(PipelineError::MissingFile(ref f)) if *f == missing));
        Ok(())
    }

    #[tokio::test]
    async fn test_r_script_arguments() -> anyhow::Result<()> {
        let config = run_config("{}", Arguments { script: Some("plot.R".to_string()), ..Default::default() });
        assert!(matches!(run_module(&config, "r_script").await, Err(PipelineError::InvalidConfig(_))));

        let dir = TempDir::new()?;
        let json = format!(r#"{{ "folders": {{ "scripts": {:?} }} }}"#, dir.path().to_string_lossy());
        let args = Arguments {
            script: Some("plot.R".to_string()),
            processing_folder: Some("quality_checking".to_string()),
            ..Default::default()
        };
        let config = run_config(&json, args);
        assert!(matches!(run_module(&config, "r_script").await, Err(PipelineError::MissingFile(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_check_tools() -> anyhow::Result<()> {
        let all_sh = r#"{ "programs": { "fastqc": "sh", "samtools": "sh", "rscript": "sh", "fastp": "sh", "seqkit": "sh" } }"#;
        assert!(run_module(&run_config(all_sh, Arguments::default()), "check_tools").await?.is_none());

        let one_missing = r#"{ "programs": { "fastqc": "sh", "samtools": "no-such-samtools-xyz", "rscript": "sh", "fastp": "sh", "seqkit": "sh" } }"#;
        let result = run_module(&run_config(one_missing, Arguments::default()), "check_tools").await;
        assert!(matches!(result, Err(PipelineError::ToolExecution { ref tool, .. }) if tool == "no-such-samtools-xyz"));
        Ok(())
    }
}
