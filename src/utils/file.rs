// src/utils/file.rs: File discovery and filename helpers

use std::path::{self, Component, Path, PathBuf};

use glob::Pattern;
use log::debug;

use crate::config::defs::{PipelineError, FILE_ENDING_FASTQ_GZ, FILE_PATTERN_R1_FASTQ_GZ, FILE_PATTERN_R2_FASTQ_GZ};

const R1_TAG: &str = "_R1";
const R2_TAG: &str = "_R2";


/// Forward and reverse mates of one paired-end sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPair {
    pub r1: PathBuf,
    pub r2: PathBuf,
}

impl ReadPair {
    /// Sample identifier: the R1 file name up to its `_R1` tag.
    pub fn sample(&self) -> String {
        let name = file_name(&self.r1);
        match name.rfind(R1_TAG) {
            Some(index) => name[..index].to_string(),
            None => strip_ending(&name, FILE_ENDING_FASTQ_GZ),
        }
    }

    /// Sample identifier that stays unique across subfolders of `base`:
    /// `run1/s1_R1.fastq.gz` below `base` becomes `run1_s1`.
    pub fn sample_below(&self, base: &Path) -> String {
        format!("{}{}", subfolder_prefix(base, &self.r1), self.sample())
    }
}


/// Sample identifier of a single-end read file below `base`, built like `ReadPair::sample_below`.
pub fn single_sample_below(base: &Path, file: &Path) -> String {
    format!("{}{}", subfolder_prefix(base, file), strip_ending(&file_name(file), FILE_ENDING_FASTQ_GZ))
}

/// Subfolders between `base` and `file`, each followed by `_`. Empty for files directly in `base`.
fn subfolder_prefix(base: &Path, file: &Path) -> String {
    let base = path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
    let Some(parent) = file.strip_prefix(&base).ok().and_then(Path::parent) else {
        return String::new();
    };
    parent
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(format!("{}_", part.to_string_lossy())),
            _ => None,
        })
        .collect()
}


/// Lists entries of `folder` matching a glob `pattern`.
///
/// # Arguments
///
/// * `folder` - Folder to search; must exist.
/// * `pattern` - Glob pattern relative to `folder`, e.g. `*_fastqc.html`.
///
/// # Returns
/// Absolute paths of the matches. No matches is a valid, empty result.
pub fn list_matching(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
    if !folder.is_dir() {
        return Err(PipelineError::InvalidFolder(folder.to_path_buf()));
    }
    glob_in(&path::absolute(folder)?, pattern)
}

fn glob_in(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let full_pattern = format!("{}/{}", Pattern::escape(&folder.to_string_lossy()), pattern);
    let entries = glob::glob(&full_pattern)
        .map_err(|e| PipelineError::InvalidConfig(format!("Invalid file pattern '{}': {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::IOError(e.to_string()))?;
        files.push(path);
    }
    Ok(files)
}


/// Finds paired-end read files below `folder` and groups them into R1/R2 pairs.
///
/// Files under a folder named `undetermined` (case-insensitive) are ignored. The remaining
/// `*_R1*`/`*_R2*` files are sorted by path so mates become adjacent and are taken two at a time.
/// Every pair is checked: an odd file count, or neighbours that are not R1/R2 mates of the same
/// sample, fail with `UnpairedReads` instead of silently producing a wrong pair.
///
/// # Arguments
///
/// * `folder` - Reads folder; searched recursively.
/// * `undetermined` - Name of the subfolder holding undetermined reads.
///
/// # Returns
/// Pairs in sample order, with absolute paths.
pub fn pair_reads(folder: &Path, undetermined: &str) -> Result<Vec<ReadPair>, PipelineError> {
    if !folder.is_dir() {
        return Err(PipelineError::InvalidFolder(folder.to_path_buf()));
    }
    let folder = path::absolute(folder)?;

    let files = reads_below(&folder, &[FILE_PATTERN_R1_FASTQ_GZ, FILE_PATTERN_R2_FASTQ_GZ], undetermined)?;

    debug!("Found {} paired-end read files in {}", files.len(), folder.display());

    if files.len() % 2 != 0 {
        return Err(PipelineError::UnpairedReads(format!(
            "{} has an odd number ({}) of R1/R2 files",
            folder.display(),
            files.len()
        )));
    }

    files
        .chunks(2)
        .map(|mates| {
            let pair = ReadPair { r1: mates[0].clone(), r2: mates[1].clone() };
            if are_mates(&pair.r1, &pair.r2) {
                Ok(pair)
            } else {
                Err(PipelineError::UnpairedReads(format!(
                    "{} and {} are not R1/R2 mates",
                    pair.r1.display(),
                    pair.r2.display()
                )))
            }
        })
        .collect()
}

/// Lists every `.fastq.gz` file below `folder`, recursively, sorted by path.
///
/// Uses the same search as `pair_reads`, so files under the undetermined folder are ignored here too.
pub fn list_reads(folder: &Path, undetermined: &str) -> Result<Vec<PathBuf>, PipelineError> {
    if !folder.is_dir() {
        return Err(PipelineError::InvalidFolder(folder.to_path_buf()));
    }
    let pattern = format!("*{}", FILE_ENDING_FASTQ_GZ);
    reads_below(&path::absolute(folder)?, &[pattern.as_str()], undetermined)
}

fn reads_below(folder: &Path, patterns: &[&str], undetermined: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for pattern in patterns {
        files.extend(glob_in(folder, &format!("**/{}", pattern))?);
    }
    files.retain(|file| !is_under_folder_named(folder, file, undetermined));
    files.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
    files.dedup();
    Ok(files)
}

fn is_under_folder_named(base: &Path, file: &Path, name: &str) -> bool {
    let relative = file.strip_prefix(base).unwrap_or(file);
    relative
        .parent()
        .map(|parent| {
            parent.components().any(|c| match c {
                Component::Normal(part) => part.to_string_lossy().eq_ignore_ascii_case(name),
                _ => false,
            })
        })
        .unwrap_or(false)
}

/// Same folder, and the names are identical once the last `_R1` of the first and the last
/// `_R2` of the second are removed.
fn are_mates(r1: &Path, r2: &Path) -> bool {
    if r1.parent() != r2.parent() {
        return false;
    }
    let (name1, name2) = (file_name(r1), file_name(r2));
    match (name1.rfind(R1_TAG), name2.rfind(R2_TAG)) {
        (Some(i1), Some(i2)) => {
            name1[..i1] == name2[..i2] && name1[i1 + R1_TAG.len()..] == name2[i2 + R2_TAG.len()..]
        }
        _ => false,
    }
}


pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Removes `ending` from `name` if present.
pub fn strip_ending(name: &str, ending: &str) -> String {
    name.strip_suffix(ending).unwrap_or(name).to_string()
}
