pub mod stage;
pub mod fastqc;
pub mod processing;
pub mod species;
