// src/config/settings.rs: Pipeline configuration document

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::config::defs::{PipelineError, DEFAULT_MIN_LENGTH, DEFAULT_MIN_QUALITY, DEFAULT_THREADS, FASTP_TAG, FASTQC_TAG, RSCRIPT_TAG, SAMTOOLS_TAG, SEQKIT_TAG};


/// Immutable configuration, loaded once at startup and handed to every component by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub folders: Folders,
    #[serde(default)]
    pub programs: Programs,
    #[serde(default)]
    pub species: BTreeMap<String, SpeciesEntry>,
    #[serde(default)]
    pub processing: Processing,
}

/// Folder names of the per-species directory tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Folders {
    pub root: PathBuf,
    pub scripts: PathBuf,
    pub raw_reads: PathBuf,
    pub processed: PathBuf,
    pub adapter_removed: String,
    pub quality_filtered: String,
    pub duplicates_removed: String,
    pub results: PathBuf,
    pub qc: String,
    pub fastqc: String,
    pub raw: String,
    pub plots: String,
    pub undetermined: String,
}

impl Default for Folders {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            scripts: PathBuf::from("scripts"),
            raw_reads: PathBuf::from("raw").join("reads"),
            processed: PathBuf::from("processed"),
            adapter_removed: "adapter_removed".to_string(),
            quality_filtered: "quality_filtered".to_string(),
            duplicates_removed: "duplicates_removed".to_string(),
            results: PathBuf::from("results"),
            qc: "qc".to_string(),
            fastqc: "fastqc".to_string(),
            raw: "raw".to_string(),
            plots: "plots".to_string(),
            undetermined: "undetermined".to_string(),
        }
    }
}

/// Paths (or names on PATH) of the external binaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Programs {
    pub fastqc: PathBuf,
    pub samtools: PathBuf,
    pub rscript: PathBuf,
    pub fastp: PathBuf,
    pub seqkit: PathBuf,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            fastqc: PathBuf::from(FASTQC_TAG),
            samtools: PathBuf::from(SAMTOOLS_TAG),
            rscript: PathBuf::from(RSCRIPT_TAG),
            fastp: PathBuf::from(FASTP_TAG),
            seqkit: PathBuf::from(SEQKIT_TAG),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeciesEntry {
    pub name: String,
    #[serde(default)]
    pub processing: SpeciesProcessing,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeciesProcessing {
    #[serde(default)]
    pub adapter_removal: SpeciesAdapterRemoval,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeciesAdapterRemoval {
    #[serde(default)]
    pub adapter: AdapterPair,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AdapterPair {
    pub r1: Option<String>,
    pub r2: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Processing {
    pub fastqc: ToolSection,
    pub adapter_removal: AdapterRemovalSection,
    pub quality_filtering: QualityFilteringSection,
    pub duplicates_removal: ToolSection,
}

/// Thread counts are kept as raw JSON values: a missing, non-integer or non-positive value
/// falls back to a single thread instead of rejecting the whole document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    pub threads: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdapterRemovalSection {
    pub threads: Option<Value>,
    pub adapters: AdapterPair,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QualityFilteringSection {
    pub threads: Option<Value>,
    pub min_quality: Option<u8>,
    pub min_length: Option<usize>,
}


/// Interprets a configured thread count.
///
/// # Arguments
///
/// * `value` - Raw JSON value from the configuration, if present.
///
/// # Returns
/// The thread count, or `DEFAULT_THREADS` if absent, non-integer or non-positive.
pub fn threads_or_default(value: Option<&Value>) -> usize {
    match value.and_then(Value::as_i64) {
        Some(threads) if threads > 0 => threads as usize,
        _ => DEFAULT_THREADS,
    }
}


impl Settings {
    /// Loads and validates a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::InvalidConfig(format!("Cannot read {}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, PipelineError> {
        let settings: Settings = serde_json::from_str(text)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Species ids become folder names, so they must be single, non-empty path components.
    fn validate(&self) -> Result<(), PipelineError> {
        for id in self.species.keys() {
            if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
                return Err(PipelineError::InvalidConfig(format!("Species ID '{}' is not a valid folder name", id)));
            }
        }
        Ok(())
    }

    /// Resolves relative `root` and `scripts` folders against `base`, the directory the run
    /// was started from. Program paths are left alone so bare names still go through PATH.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        for folder in [&mut self.folders.root, &mut self.folders.scripts] {
            if folder.is_relative() {
                *folder = base.join(&*folder);
            }
        }
        self
    }

    pub fn is_species(&self, species: &str) -> bool {
        self.species.contains_key(species)
    }

    /// Configured species ids, in sorted order.
    pub fn species_ids(&self) -> impl Iterator<Item = &str> {
        self.species.keys().map(String::as_str)
    }

    pub fn species_name(&self, species: &str) -> Result<&str, PipelineError> {
        self.species
            .get(species)
            .map(|entry| entry.name.as_str())
            .ok_or_else(|| PipelineError::InvalidSpecies(species.to_string()))
    }

    /// Adapter sequences for R1 and R2. A species-level adapter wins over the global default,
    /// per read end.
    ///
    /// # Returns
    /// (r1, r2); fails if neither end has a sequence.
    pub fn adapter_sequence(&self, species: &str) -> Result<(Option<String>, Option<String>), PipelineError> {
        let entry = self.species
            .get(species)
            .ok_or_else(|| PipelineError::InvalidSpecies(species.to_string()))?;

        let defaults = &self.processing.adapter_removal.adapters;
        let own = &entry.processing.adapter_removal.adapter;

        let r1 = own.r1.clone().or_else(|| defaults.r1.clone());
        let r2 = own.r2.clone().or_else(|| defaults.r2.clone());

        if r1.is_none() && r2.is_none() {
            return Err(PipelineError::AdapterNotFound(species.to_string()));
        }
        Ok((r1, r2))
    }

    pub fn fastqc_threads(&self) -> usize {
        threads_or_default(self.processing.fastqc.threads.as_ref())
    }

    pub fn adapter_removal_threads(&self) -> usize {
        threads_or_default(self.processing.adapter_removal.threads.as_ref())
    }

    pub fn quality_filtering_threads(&self) -> usize {
        threads_or_default(self.processing.quality_filtering.threads.as_ref())
    }

    pub fn duplicates_removal_threads(&self) -> usize {
        threads_or_default(self.processing.duplicates_removal.threads.as_ref())
    }

    pub fn min_quality(&self) -> u8 {
        self.processing.quality_filtering.min_quality.unwrap_or(DEFAULT_MIN_QUALITY)
    }

    pub fn min_length(&self) -> usize {
        self.processing.quality_filtering.min_length.unwrap_or(DEFAULT_MIN_LENGTH)
    }
}
