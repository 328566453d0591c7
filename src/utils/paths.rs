// src/utils/paths.rs: Per-species folder layout

use std::fmt;
use std::path::PathBuf;

use crate::config::defs::{PipelineError, FILE_ENDING_ADAPTER_REMOVED_FASTQ_GZ, FILE_ENDING_DUPLICATES_REMOVED_FASTQ_GZ, FILE_ENDING_FASTQ_GZ, FILE_ENDING_QUALITY_FILTERED_FASTQ_GZ};
use crate::config::settings::Settings;


/// Read state along the processing chain. Every stage has its own reads folder and its own
/// FastQC report folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Raw,
    AdapterRemoved,
    QualityFiltered,
    DuplicatesRemoved,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Raw, Stage::AdapterRemoved, Stage::QualityFiltered, Stage::DuplicatesRemoved];

    /// Suffix of the read files belonging to this stage.
    pub fn file_ending(&self) -> &'static str {
        match self {
            Stage::Raw => FILE_ENDING_FASTQ_GZ,
            Stage::AdapterRemoved => FILE_ENDING_ADAPTER_REMOVED_FASTQ_GZ,
            Stage::QualityFiltered => FILE_ENDING_QUALITY_FILTERED_FASTQ_GZ,
            Stage::DuplicatesRemoved => FILE_ENDING_DUPLICATES_REMOVED_FASTQ_GZ,
        }
    }

    /// Glob pattern selecting the read files of this stage inside its reads folder.
    pub fn input_pattern(&self) -> String {
        format!("*{}", self.file_ending())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Raw => write!(f, "raw"),
            Stage::AdapterRemoved => write!(f, "adapter removed"),
            Stage::QualityFiltered => write!(f, "quality filtered"),
            Stage::DuplicatesRemoved => write!(f, "duplicates removed"),
        }
    }
}


/// Resolves folders from the configuration. Pure: never touches the filesystem.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    settings: &'a Settings,
}

impl<'a> PathResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// `<root>/<species>`; fails for species not present in the configuration.
    pub fn species_folder(&self, species: &str) -> Result<PathBuf, PipelineError> {
        if !self.settings.is_species(species) {
            return Err(PipelineError::InvalidSpecies(species.to_string()));
        }
        Ok(self.settings.folders.root.join(species))
    }

    /// Folder holding the reads of `stage`.
    pub fn reads_folder(&self, species: &str, stage: Stage) -> Result<PathBuf, PipelineError> {
        let folders = &self.settings.folders;
        let species_folder = self.species_folder(species)?;
        Ok(match stage {
            Stage::Raw => species_folder.join(&folders.raw_reads),
            Stage::AdapterRemoved => species_folder.join(&folders.processed).join(&folders.adapter_removed),
            Stage::QualityFiltered => species_folder.join(&folders.processed).join(&folders.quality_filtered),
            Stage::DuplicatesRemoved => species_folder.join(&folders.processed).join(&folders.duplicates_removed),
        })
    }

    /// FastQC report folder for the reads of `stage`.
    pub fn fastqc_folder(&self, species: &str, stage: Stage) -> Result<PathBuf, PipelineError> {
        let folders = &self.settings.folders;
        let stage_folder = match stage {
            Stage::Raw => &folders.raw,
            Stage::AdapterRemoved => &folders.adapter_removed,
            Stage::QualityFiltered => &folders.quality_filtered,
            Stage::DuplicatesRemoved => &folders.duplicates_removed,
        };
        Ok(self.species_folder(species)?
            .join(&folders.results)
            .join(&folders.qc)
            .join(&folders.fastqc)
            .join(stage_folder))
    }

    /// `<scripts>/<processing_folder>/plots`
    pub fn scripts_plots_folder(&self, processing_folder: &str) -> PathBuf {
        let folders = &self.settings.folders;
        folders.scripts.join(processing_folder).join(&folders.plots)
    }
}
