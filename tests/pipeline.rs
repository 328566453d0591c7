use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use tempfile::TempDir;

use adna_pipelines::cli::Arguments;
use adna_pipelines::config::defs::{PipelineError, RunConfig};
use adna_pipelines::config::settings::Settings;
use adna_pipelines::pipelines::fastqc::fastqc_for_stage;
use adna_pipelines::pipelines::species::{run_for_all_species, QC_STEPS};
use adna_pipelines::pipelines::stage::StageOutcome;
use adna_pipelines::utils::command::{CommandInvocation, CommandRunner, SystemRunner};
use adna_pipelines::utils::paths::Stage;


#[derive(Default)]
struct CountingRunner {
    calls: Mutex<Vec<CommandInvocation>>,
}

impl CommandRunner for CountingRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<String, PipelineError> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok(String::new())
    }
}

fn run_config(root: &Path, extra: &str) -> Result<RunConfig> {
    let json = format!(
        r#"{{ "folders": {{ "root": {:?} }},
             "species": {{ "mouse": {{ "name": "Mus musculus" }} }}
             {} }}"#,
        root.to_string_lossy(),
        extra
    );
    Ok(RunConfig {
        cwd: root.to_path_buf(),
        settings: Settings::from_json_str(&json)?,
        args: Arguments::default(),
    })
}

fn mouse_with_raw_reads(root: &Path) -> Result<(PathBuf, PathBuf)> {
    let raw = root.join("mouse/raw/reads");
    let fastqc_out = root.join("mouse/results/qc/fastqc/raw");
    fs::create_dir_all(&raw)?;
    fs::create_dir_all(&fastqc_out)?;
    fs::write(raw.join("sample1.fastq.gz"), "")?;
    fs::write(raw.join("sample2.fastq.gz"), "")?;
    Ok((raw, fastqc_out))
}


#[tokio::test]
async fn test_mouse_raw_fastqc_default_threads() -> Result<()> {
    let dir = TempDir::new()?;
    let (raw, fastqc_out) = mouse_with_raw_reads(dir.path())?;
    let config = run_config(dir.path(), "")?;
    let runner = CountingRunner::default();

    let outcome = fastqc_for_stage(&config, &runner, "mouse", Stage::Raw).await?;
    assert!(matches!(outcome, StageOutcome::Completed));

    let calls = runner.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let args = &calls[0].args;
    assert_eq!(args[0], "-o");
    assert_eq!(PathBuf::from(&args[1]), fastqc_out);
    assert_eq!(args[2], "-t");
    assert_eq!(args[3], "1");
    let mut reads: Vec<PathBuf> = args[4..].iter().map(PathBuf::from).collect();
    reads.sort();
    assert_eq!(reads, vec![
        std::path::absolute(raw.join("sample1.fastq.gz"))?,
        std::path::absolute(raw.join("sample2.fastq.gz"))?,
    ]);
    Ok(())
}

#[tokio::test]
async fn test_mouse_raw_fastqc_configured_threads() -> Result<()> {
    let dir = TempDir::new()?;
    mouse_with_raw_reads(dir.path())?;
    let config = run_config(dir.path(), r#", "processing": { "fastqc": { "threads": 12 } }"#)?;
    let runner = CountingRunner::default();

    fastqc_for_stage(&config, &runner, "mouse", Stage::Raw).await?;
    let calls = runner.calls.lock().unwrap().clone();
    assert_eq!(calls[0].args[3], "12");
    Ok(())
}

#[tokio::test]
async fn test_mouse_existing_report_is_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, fastqc_out) = mouse_with_raw_reads(dir.path())?;
    fs::write(fastqc_out.join("sample1_fastqc.html"), "<html/>")?;
    let config = run_config(dir.path(), "")?;
    let runner = CountingRunner::default();

    let outcome = fastqc_for_stage(&config, &runner, "mouse", Stage::Raw).await?;
    assert!(matches!(outcome, StageOutcome::Skipped));
    assert!(runner.calls.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_species() -> Result<()> {
    let dir = TempDir::new()?;
    let config = run_config(dir.path(), "")?;
    let runner = CountingRunner::default();
    let result = fastqc_for_stage(&config, &runner, "mammoth", Stage::Raw).await;
    assert!(matches!(result, Err(PipelineError::InvalidSpecies(ref s)) if s == "mammoth"));
    Ok(())
}

/// A stand-in FastQC that writes one report per input and appends to a call log.
fn fake_fastqc(dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let log = dir.join("fastqc_calls.log");
    let script = dir.join("fastqc");
    fs::write(&script, format!(
        "#!/bin/sh\n\
         echo \"$@\" >> '{}'\n\
         out=\"$2\"\n\
         shift 4\n\
         for f in \"$@\"; do\n\
           name=$(basename \"$f\" .fastq.gz)\n\
           touch \"$out/${{name}}_fastqc.html\"\n\
           echo \"Analysis complete for $name\"\n\
         done\n",
        log.display()
    ))?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
    Ok((script, log))
}

#[tokio::test]
async fn test_end_to_end_idempotence_with_real_process() -> Result<()> {
    let dir = TempDir::new()?;
    let (_, fastqc_out) = mouse_with_raw_reads(dir.path())?;
    let (script, log) = fake_fastqc(dir.path())?;
    let config = run_config(
        dir.path(),
        &format!(r#", "programs": {{ "fastqc": {:?} }}"#, script.to_string_lossy()),
    )?;

    let outcome = fastqc_for_stage(&config, &SystemRunner, "mouse", Stage::Raw).await?;
    assert!(matches!(outcome, StageOutcome::Completed));
    assert!(fastqc_out.join("sample1_fastqc.html").exists());
    assert!(fastqc_out.join("sample2_fastqc.html").exists());

    let outcome = fastqc_for_stage(&config, &SystemRunner, "mouse", Stage::Raw).await?;
    assert!(matches!(outcome, StageOutcome::Skipped));
    assert_eq!(fs::read_to_string(&log)?.lines().count(), 1, "fastqc must run exactly once");
    Ok(())
}

#[tokio::test]
async fn test_failing_tool_is_reported_not_raised() -> Result<()> {
    let dir = TempDir::new()?;
    mouse_with_raw_reads(dir.path())?;
    let config = run_config(dir.path(), r#", "programs": { "fastqc": "false" }"#)?;

    let outcome = fastqc_for_stage(&config, &SystemRunner, "mouse", Stage::Raw).await?;
    match outcome {
        StageOutcome::Failed(PipelineError::CommandExecution { code, .. }) => assert_eq!(code, Some(1)),
        other => panic!("Expected a failed stage, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_qc_sequence_stops_on_missing_folder() -> Result<()> {
    let dir = TempDir::new()?;
    mouse_with_raw_reads(dir.path())?;
    let config = run_config(dir.path(), "")?;
    let runner = CountingRunner::default();

    let result = run_for_all_species(&config, &runner, &QC_STEPS).await;
    assert!(matches!(result, Err(PipelineError::InvalidFolder(_))), "adapter removed folder does not exist yet");
    assert_eq!(runner.calls.lock().unwrap().len(), 1, "raw QC ran before the error");
    Ok(())
}
