// src/process/mod.rs
//
// The single-pass transform at the heart of the collector: decode each
// downloaded file, reshape its rows onto the canonical schema, and
// concatenate everything in a deterministic order.

pub mod decode;
pub mod harmonize;

use std::collections::{BTreeMap, BTreeSet};

use csv::ReaderBuilder;
use tracing::{debug, instrument};

use crate::config::Configuration;
use crate::error::Result;
use crate::report::RunReport;
use crate::schema::MAX_ADMIN_LEVEL;

pub use harmonize::CountryContext;

/// One downloaded CSV after decoding, immutable once parsed.
#[derive(Debug, Clone)]
pub struct SourceFileRecord {
    pub filename: String,
    pub iso3: String,
    pub admin_level: u8,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// One population observation in the canonical schema. Admin fields above
/// the row's own depth are empty strings, never a null sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedRow {
    pub iso3: String,
    pub country: String,
    pub adm_pcode: [String; 4],
    pub adm_name: [String; 4],
    pub population_group: String,
    pub gender: String,
    pub age_range: String,
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    pub population: u64,
    pub reference_year: i32,
    pub source: String,
    pub contributor: String,
    /// Depth of the source file, not an output column.
    pub admin_level: u8,
}

impl HarmonizedRow {
    /// Values in canonical column order, for the CSV writer.
    pub fn csv_record(&self) -> Vec<String> {
        let mut record = vec![self.iso3.clone(), self.country.clone()];
        for k in 0..MAX_ADMIN_LEVEL as usize {
            record.push(self.adm_pcode[k].clone());
            record.push(self.adm_name[k].clone());
        }
        record.push(self.population_group.clone());
        record.push(self.gender.clone());
        record.push(self.age_range.clone());
        record.push(self.age_min.map(|a| a.to_string()).unwrap_or_default());
        record.push(self.age_max.map(|a| a.to_string()).unwrap_or_default());
        record.push(self.population.to_string());
        record.push(self.reference_year.to_string());
        record.push(self.source.clone());
        record.push(self.contributor.clone());
        record
    }
}

/// Parse decoded CSV text into headers and rows. The reader is flexible:
/// short rows happen in the wild and the harmonizer treats absent cells as
/// empty.
pub fn parse_file(
    filename: &str,
    iso3: &str,
    admin_level: u8,
    text: &str,
) -> Result<SourceFileRecord> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut headers = Vec::new();
    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        let cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
        if idx == 0 {
            headers = cells;
        } else {
            rows.push(cells);
        }
    }

    Ok(SourceFileRecord {
        filename: filename.to_string(),
        iso3: iso3.to_string(),
        admin_level,
        headers,
        rows,
    })
}

/// Concatenate per-file row groups, preserving per-file row order and the
/// overall file-processing order. No deduplication: duplicates across files
/// are a curation problem, not a transform problem.
pub fn combine(per_file: Vec<Vec<HarmonizedRow>>) -> Vec<HarmonizedRow> {
    per_file.into_iter().flatten().collect()
}

/// Accumulates harmonized rows and run metadata across countries, one file
/// at a time in the caller's iteration order.
pub struct Collector<'a> {
    config: &'a Configuration,
    files: Vec<Vec<HarmonizedRow>>,
    pub report: RunReport,
    pub countries: Vec<String>,
    pub reference_years: BTreeSet<i32>,
    /// "ISO3_level" -> chosen resource filename.
    pub resource_names: BTreeMap<String, String>,
}

impl<'a> Collector<'a> {
    pub fn new(config: &'a Configuration) -> Self {
        Self {
            config,
            files: Vec::new(),
            report: RunReport::new(),
            countries: Vec::new(),
            reference_years: BTreeSet::new(),
            resource_names: BTreeMap::new(),
        }
    }

    /// Decode, parse and harmonize one downloaded file, appending its rows
    /// to the run. Decoding and schema failures propagate: a corrupt file
    /// must stop the run, not silently thin the output.
    #[instrument(level = "debug", skip(self, country, bytes), fields(file = filename))]
    pub fn ingest_file(
        &mut self,
        country: &CountryContext,
        admin_level: u8,
        filename: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let params = self.config.resolve_file_params(filename);
        let text = decode::decode(filename, bytes, &params.encoding)?;
        let record = parse_file(filename, &country.iso3, admin_level, &text)?;

        let (reference_year, year_source) =
            harmonize::resolve_reference_year(&params, &record, country.end_year);
        self.report.add_year_source(&country.iso3, year_source);

        let rows = harmonize::harmonize(
            &record,
            self.config,
            country,
            reference_year,
            &params.encoding,
            &mut self.report,
        )?;
        debug!(rows = rows.len(), year = reference_year, "harmonized");

        if !rows.is_empty() {
            self.reference_years.insert(reference_year);
        }
        self.resource_names.insert(
            format!("{}_{}", country.iso3, admin_level),
            filename.to_string(),
        );
        self.files.push(rows);
        Ok(())
    }

    /// Close out a country: record it and check its missing admin levels.
    /// A trailing run of absent levels just means the country publishes
    /// shallower data; any other gap is an anomaly worth a warning.
    pub fn finish_country(&mut self, country: &CountryContext, missing_levels: &[u8]) {
        self.countries.push(country.iso3.clone());
        if let Some(levels) = unexpected_missing_levels(missing_levels) {
            self.report.add_warning(
                &country.dataset_name,
                format!(
                    "{}: missing unexpected admin levels: {:?}",
                    country.iso3, levels
                ),
            );
        }
    }

    /// Finish the run: annotate known errors and hand back the combined
    /// rows with the report.
    pub fn into_combined(mut self) -> (Vec<HarmonizedRow>, RunReport) {
        self.report.annotate_known_errors(&self.config.known_errors);
        (combine(self.files), self.report)
    }
}

/// Filter out the expected case where only the deepest levels are absent:
/// missing [3, 4] on a country that stops at adm2 is normal, missing [0, 4]
/// is not.
pub fn unexpected_missing_levels(missing: &[u8]) -> Option<Vec<u8>> {
    let count = missing.len() as u8;
    let levels = MAX_ADMIN_LEVEL + 1;
    let expected: Vec<u8> = (levels - count..levels).collect();
    if missing == expected {
        None
    } else {
        Some(missing.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::hapi;
    use crate::schema;
    use std::collections::HashMap;

    fn test_config() -> Configuration {
        let hxl_tags = schema::COLUMNS
            .iter()
            .map(|c| (c.to_string(), format!("#{}", c.to_lowercase())))
            .collect();
        let hapi_hxl_tags = hapi::COLUMNS
            .iter()
            .map(|c| (c.to_string(), format!("#{c}")))
            .collect();
        Configuration {
            dataset_name: "cod-ps-global".into(),
            dataset_title: "Test".into(),
            tags: vec![],
            hxl_tags,
            hapi_dataset_name: "hdx-hapi-population".into(),
            hapi_dataset_title: "Test".into(),
            hapi_resource_name: "Test".into(),
            hapi_resource_description: "Test".into(),
            hapi_hxl_tags,
            encoding_exceptions: HashMap::from([(
                "ago_admpop_adm2_2024.csv".to_string(),
                "latin-1".to_string(),
            )]),
            reference_year_exceptions: HashMap::new(),
            non_latin_alphabets: vec!["ar".into()],
            known_errors: vec!["CAF: missing unexpected admin levels: [0, 4]".into()],
        }
    }

    fn country(iso3: &str, end_year: i32) -> CountryContext {
        CountryContext {
            iso3: iso3.into(),
            dataset_name: format!("cod-ps-{}", iso3.to_lowercase()),
            country: match iso3 {
                "AGO" => "Angola".into(),
                "CAF" => "Central African Republic".into(),
                _ => "Testland".into(),
            },
            source: "National census".into(),
            contributor: format!("OCHA {iso3}"),
            end_year: Some(end_year),
        }
    }

    #[test]
    fn missing_level_check_accepts_trailing_runs_only() {
        assert_eq!(unexpected_missing_levels(&[]), None);
        assert_eq!(unexpected_missing_levels(&[4]), None);
        assert_eq!(unexpected_missing_levels(&[3, 4]), None);
        assert_eq!(unexpected_missing_levels(&[0, 1, 2, 3, 4]), None);
        assert_eq!(unexpected_missing_levels(&[0, 4]), Some(vec![0, 4]));
        assert_eq!(unexpected_missing_levels(&[0]), Some(vec![0]));
        assert_eq!(unexpected_missing_levels(&[2, 3]), Some(vec![2, 3]));
    }

    #[test]
    fn combine_preserves_file_and_row_order() {
        let config = test_config();
        let mut collector = Collector::new(&config);
        let caf = country("CAF", 2015);
        collector
            .ingest_file(
                &caf,
                1,
                "caf_admpop_adm1_2015_v2.csv",
                b"ADM1_PCODE,ADM1_EN,T_TL\nCF11,Ombella M'Poko,448465\nCF22,Nana Mambere,28016\n",
            )
            .unwrap();
        let cod = country("COD", 2020);
        collector
            .ingest_file(&cod, 0, "cod_admpop_adm0_2020.csv", b"T_TL\n89561403\n")
            .unwrap();

        assert_eq!(
            collector.resource_names.get("CAF_1").map(String::as_str),
            Some("caf_admpop_adm1_2015_v2.csv")
        );
        assert_eq!(
            collector.reference_years.iter().copied().collect::<Vec<_>>(),
            vec![2015, 2020]
        );

        let (rows, _) = collector.into_combined();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].iso3, "CAF");
        assert_eq!(rows[0].adm_pcode[0], "CF11");
        assert_eq!(rows[1].adm_pcode[0], "CF22");
        assert_eq!(rows[2].iso3, "COD");
    }

    #[test]
    fn latin1_and_utf8_files_combine_without_corruption() {
        let config = test_config();
        let mut collector = Collector::new(&config);

        // latin-1 override: é is a single 0xE9 byte
        let ago = country("AGO", 2024);
        collector
            .ingest_file(
                &ago,
                2,
                "ago_admpop_adm2_2024.csv",
                b"ADM1_PCODE,ADM1_EN,ADM2_PCODE,ADM2_EN,T_TL\nAO01,Bi\xe9,AO0101,Cu\xedto,422076\n",
            )
            .unwrap();

        // default utf-8
        let caf = country("CAF", 2015);
        collector
            .ingest_file(
                &caf,
                2,
                "caf_admpop_adm2_2015_v2.csv",
                "ADM1_PCODE,ADM1_EN,ADM2_PCODE,ADM2_EN,T_TL\nCF22,Nana Mambéré,CF224,Abba,28016\n"
                    .as_bytes(),
            )
            .unwrap();

        let (rows, report) = collector.into_combined();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].adm_name[0], "Bié");
        assert_eq!(rows[0].adm_name[1], "Cuíto");
        assert_eq!(rows[1].adm_name[0], "Nana Mambéré");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn wrong_encoding_halts_the_run() {
        let config = test_config();
        let mut collector = Collector::new(&config);
        let ago = country("AGO", 2024);
        // not listed in encoding_exceptions, so decoded as utf-8
        let err = collector
            .ingest_file(
                &ago,
                1,
                "ago_admpop_adm1_2024.csv",
                b"ADM1_PCODE,ADM1_EN,T_TL\nAO01,Bi\xe9,1000\n",
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::ScraperError::Decoding { .. }));
    }

    #[test]
    fn known_missing_levels_are_annotated() {
        let config = test_config();
        let mut collector = Collector::new(&config);
        let caf = country("CAF", 2015);
        collector.finish_country(&caf, &[0, 4]);
        let tst = country("TST", 2020);
        collector.finish_country(&tst, &[0]);

        let (_, report) = collector.into_combined();
        let caf_warning = report
            .warnings
            .iter()
            .find(|w| w.message.contains("[0, 4]"))
            .unwrap();
        assert!(caf_warning.known);
        let tst_warning = report
            .warnings
            .iter()
            .find(|w| w.message.contains("TST"))
            .unwrap();
        assert!(!tst_warning.known);
    }

    #[test]
    fn csv_record_matches_column_order() {
        let row = HarmonizedRow {
            iso3: "CAF".into(),
            country: "Central African Republic".into(),
            adm_pcode: ["CF22".into(), "CF224".into(), String::new(), String::new()],
            adm_name: [
                "Nana Mambéré".into(),
                "Abba".into(),
                String::new(),
                String::new(),
            ],
            population_group: "T_TL".into(),
            gender: "all".into(),
            age_range: "all".into(),
            age_min: None,
            age_max: None,
            population: 28016,
            reference_year: 2015,
            source: "Census".into(),
            contributor: "OCHA".into(),
            admin_level: 2,
        };
        let record = row.csv_record();
        assert_eq!(record.len(), schema::COLUMNS.len());
        assert_eq!(record[0], "CAF");
        assert_eq!(record[2], "CF22");
        assert_eq!(record[4], "CF224");
        assert_eq!(record[13], ""); // Age_min
        assert_eq!(record[15], "28016");
        assert_eq!(record[16], "2015");
    }
}
