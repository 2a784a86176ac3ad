//! Run configuration, loaded from `config/project.yaml`. Most of it is data,
//! not behavior: dataset metadata, HXL tag maps, and the per-filename override
//! tables that capture exceptions to the defaults.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, ScraperError};
use crate::process::decode;
use crate::publish::hapi;
use crate::schema;

/// Encoding assumed for any file not listed in `encoding_exceptions`.
pub const DEFAULT_ENCODING: &str = "utf-8";

#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub dataset_name: String,
    pub dataset_title: String,
    pub tags: Vec<String>,
    pub hxl_tags: HashMap<String, String>,

    pub hapi_dataset_name: String,
    pub hapi_dataset_title: String,
    pub hapi_resource_name: String,
    pub hapi_resource_description: String,
    pub hapi_hxl_tags: HashMap<String, String>,

    /// filename -> character encoding, for files not served as UTF-8.
    #[serde(default)]
    pub encoding_exceptions: HashMap<String, String>,
    /// filename -> reference year, for files where no derivation gets it right.
    #[serde(default)]
    pub reference_year_exceptions: HashMap<String, i32>,
    /// Language suffixes of admin-name columns that should lose against a
    /// Latin-alphabet alternative when a file carries both.
    #[serde(default)]
    pub non_latin_alphabets: Vec<String>,
    /// Anomaly messages that curators have reviewed and accepted.
    #[serde(default)]
    pub known_errors: Vec<String>,
}

/// Per-file parameters resolved from the override tables.
#[derive(Debug, Clone, PartialEq)]
pub struct FileParams {
    pub encoding: String,
    pub reference_year: Option<i32>,
}

impl Configuration {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        let config: Configuration = serde_yaml::from_str(&raw).map_err(|e| {
            ScraperError::Config(format!("parsing {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fail before any network I/O: a half-tagged or mis-encoded output is
    /// worse than no run at all.
    pub fn validate(&self) -> Result<()> {
        schema::tag_row(&self.hxl_tags)?;
        schema::tag_row_for(&hapi::COLUMNS, &self.hapi_hxl_tags)?;
        for (filename, label) in &self.encoding_exceptions {
            if decode::lookup(label).is_none() {
                return Err(ScraperError::Config(format!(
                    "unknown encoding {label:?} configured for {filename}"
                )));
            }
        }
        Ok(())
    }

    /// Look up the per-file overrides, falling back to defaults. Missing
    /// entries are not an error: the tables exist precisely to capture
    /// exceptions.
    pub fn resolve_file_params(&self, filename: &str) -> FileParams {
        FileParams {
            encoding: self
                .encoding_exceptions
                .get(filename)
                .cloned()
                .unwrap_or_else(|| DEFAULT_ENCODING.to_string()),
            reference_year: self.reference_year_exceptions.get(filename).copied(),
        }
    }

    pub fn is_known_error(&self, message: &str) -> bool {
        self.known_errors.iter().any(|k| k == message)
    }
}
