//! Run report: non-fatal findings accumulated while collecting, plus the
//! provenance metadata the dataset description draws on. Anomalies never stop
//! the run; pre-catalogued ones are relabeled as known before the summary.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

/// How a file's reference year was determined, for provenance logging.
pub const YEAR_FROM_EXCEPTION: &str = "exception";
pub const YEAR_FROM_DATE_HEADER: &str = "date header";
pub const YEAR_FROM_RESOURCE_NAME: &str = "resource name";
pub const YEAR_FROM_DATASET_DATE: &str = "dataset date";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub dataset: String,
    pub message: String,
    /// Set when the message appears in the configured known-error list.
    pub known: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub warnings: Vec<Warning>,
    /// iso3 -> source headers that matched no population pattern.
    pub nonmatching_headers: BTreeMap<String, BTreeSet<String>>,
    /// iso3 -> year derivation sources seen across that country's files.
    pub year_sources: BTreeMap<String, BTreeSet<&'static str>>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, dataset: &str, message: impl Into<String>) {
        let message = message.into();
        let duplicate = self
            .warnings
            .iter()
            .any(|w| w.dataset == dataset && w.message == message);
        if !duplicate {
            self.warnings.push(Warning {
                dataset: dataset.to_string(),
                message,
                known: false,
            });
        }
    }

    pub fn add_nonmatching_header(&mut self, iso3: &str, header: &str) {
        self.nonmatching_headers
            .entry(iso3.to_string())
            .or_default()
            .insert(header.to_string());
    }

    pub fn add_year_source(&mut self, iso3: &str, source: &'static str) {
        self.year_sources
            .entry(iso3.to_string())
            .or_default()
            .insert(source);
    }

    /// Relabel warnings whose message curators have already reviewed.
    /// Row output is unaffected; this is documentation-as-data.
    pub fn annotate_known_errors(&mut self, known_errors: &[String]) {
        for warning in &mut self.warnings {
            if known_errors.iter().any(|k| *k == warning.message) {
                warning.known = true;
            }
        }
    }

    pub fn log_summary(&self) {
        for warning in &self.warnings {
            if warning.known {
                info!(dataset = %warning.dataset, "known issue: {}", warning.message);
            } else {
                warn!(dataset = %warning.dataset, "{}", warning.message);
            }
        }
        for (iso3, headers) in &self.nonmatching_headers {
            debug!(iso3 = %iso3, headers = ?headers, "headers without a population pattern");
        }
        for (iso3, sources) in &self.year_sources {
            debug!(iso3 = %iso3, sources = ?sources, "reference year derivation");
        }
        let unknown = self.warnings.iter().filter(|w| !w.known).count();
        info!(
            warnings = self.warnings.len(),
            unknown, "run report complete"
        );
    }
}
