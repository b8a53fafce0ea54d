//! Core of a cross-correlation MS/MS database search engine: candidate
//! peptides are enumerated from a protein database by a mass-constrained
//! sliding window, optionally expanded over variable-modification
//! placements, and scored against preprocessed query spectra by summing
//! binned fragment-ion intensities.

use thiserror::Error as ThisError;

pub mod config;
pub mod enzyme;
pub mod fasta;
pub mod ion;
pub mod mass;
pub mod modification;
pub mod query;
pub mod scoring;
pub mod search;
pub mod translate;

pub use config::{Builder, Parameters};
pub use fasta::{FastaReader, Protein};
pub use query::{Query, QuerySet, Spectrum, XcorrData};
pub use search::{SearchSummary, Searcher};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("cannot read sequence database: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed sequence database: {0}")]
    ParseDatabase(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("resource exhausted: {0}")]
    Resource(String),
    #[error("internal error: {0}")]
    Internal(String),
}
