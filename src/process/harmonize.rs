//! Header harmonization: maps whatever column layout a source file uses onto
//! the canonical schema. Admin pcode/name columns are located by pattern,
//! population columns are recognized by their gender/age naming convention,
//! and anything unknown stays blank rather than guessed.

use std::collections::HashSet;

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{Configuration, FileParams};
use crate::error::{Result, ScraperError};
use crate::process::decode;
use crate::process::{HarmonizedRow, SourceFileRecord};
use crate::report::{
    RunReport, YEAR_FROM_DATASET_DATE, YEAR_FROM_DATE_HEADER, YEAR_FROM_EXCEPTION,
    YEAR_FROM_RESOURCE_NAME,
};

static POP_TOTAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[fmt]_tl$").unwrap());
static POP_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[fmt]_[0-9]{1,3}_?[0-9]{1,3}$").unwrap());
static POP_PLUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[fmt]_[0-9]{2,3}_?plus$").unwrap());

/// Country-level facts shared by every row harmonized from one dataset.
#[derive(Debug, Clone)]
pub struct CountryContext {
    pub iso3: String,
    pub dataset_name: String,
    pub country: String,
    pub source: String,
    pub contributor: String,
    /// End year of the dataset's declared time period, the year of last resort.
    pub end_year: Option<i32>,
}

/// True for headers that carry a population count: `f_tl`, `m_05_09`,
/// `t_80plus` and friends.
pub fn is_population_header(header: &str) -> bool {
    POP_TOTAL_RE.is_match(header)
        || POP_RANGE_RE.is_match(header)
        || POP_PLUS_RE.is_match(header)
}

/// Headers naming the admin `level` pcode, e.g. `ADM1_PCODE`, `admin2Pcode`.
pub fn code_headers<'a>(headers: &'a [String], level: u8) -> Vec<&'a str> {
    let re = Regex::new(&format!(r"(?i)^adm(in)?{level}_?p?code")).unwrap();
    headers
        .iter()
        .filter(|h| re.is_match(h))
        .map(String::as_str)
        .collect()
}

/// Headers naming the admin `level` name column. Files often carry one column
/// per language; prefer `_en`, then any Latin-alphabet suffix, else keep all
/// candidates and let the caller take the first.
pub fn name_headers<'a>(
    headers: &'a [String],
    level: u8,
    non_latin_alphabets: &[String],
) -> Vec<&'a str> {
    let main = Regex::new(&format!(
        r"(?i)^(adm(in)?{level}(name)?_?)((name$)|[a-z][a-z]$)"
    ))
    .unwrap();
    let alt = Regex::new(&format!(r"(?i)^name_?{level}$")).unwrap();

    let candidates: Vec<&str> = headers
        .iter()
        .filter(|h| main.is_match(h) || alt.is_match(h))
        .map(String::as_str)
        .collect();
    if candidates.len() <= 1 {
        return candidates;
    }

    let english: Vec<&str> = candidates
        .iter()
        .filter(|h| h.to_lowercase().ends_with("_en"))
        .copied()
        .collect();
    if english.len() == 1 {
        return english;
    }

    let latin: Vec<&str> = candidates
        .iter()
        .filter(|h| {
            let bytes = h.as_bytes();
            bytes.len() >= 3
                && bytes[bytes.len() - 3] == b'_'
                && !non_latin_alphabets
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(&h[h.len() - 2..]))
        })
        .copied()
        .collect();
    if !latin.is_empty() {
        return latin;
    }
    candidates
}

/// Split a population header into gender and age range: `T_TL` -> (all, all),
/// `F_00_04` -> (f, 0-4), `f_4045` -> (f, 40-45), `m_80plus` -> (m, 80+).
pub fn gender_and_age_range(header: &str) -> (String, String) {
    let lower = header.to_lowercase();
    let mut parts: Vec<String> = lower.split('_').map(str::to_string).collect();

    let gender = match parts[0].as_str() {
        "t" => "all".to_string(),
        g => g.to_string(),
    };
    if parts.len() < 2 || parts[1] == "tl" {
        return (gender, "all".to_string());
    }

    // f_80_plus and f_80plus mean the same open-ended bucket
    if parts.last().map(String::as_str) == Some("plus") {
        parts.pop();
        let last = parts.last_mut().unwrap();
        last.push_str("plus");
    }
    // f_00 or m_100: a single bound is an exact age
    if parts.len() == 2 && parts[1].len() < 4 {
        let bound = parts[1].clone();
        parts.push(bound);
    }
    // f_4045: two packed two-digit bounds
    if parts.len() == 2 && parts[1].len() == 4 && parts[1].chars().all(|c| c.is_ascii_digit()) {
        let upper = parts[1][2..].to_string();
        parts[1].truncate(2);
        parts.push(upper);
    }
    // strip leading zeros from numeric bounds
    if parts.len() == 3 {
        for part in &mut parts[1..] {
            if let Ok(n) = part.parse::<u32>() {
                *part = n.to_string();
            }
        }
    }

    let age_range = parts[1..].join("-").replace("plus", "+");
    (gender, age_range)
}

/// Bounds of an age range: `0-4` -> (0, 4), `80+` -> (80, None),
/// `all`/`unknown` -> neither.
pub fn min_and_max_age(age_range: &str) -> (Option<u32>, Option<u32>) {
    if age_range == "all" || age_range == "unknown" {
        return (None, None);
    }
    if let Some(min) = age_range.strip_suffix('+') {
        return (min.parse().ok(), None);
    }
    match age_range.split_once('-') {
        Some((lo, hi)) => (lo.parse().ok(), hi.parse().ok()),
        None => (age_range.parse().ok(), age_range.parse().ok()),
    }
}

/// First standalone 4-digit year (2xxx) in a resource filename, e.g.
/// `caf_admpop_adm1_2015_v2.csv` -> 2015. Digit runs of any other length
/// never match, so version counters and pcodes are ignored.
pub fn resource_year(filename: &str) -> Option<i32> {
    static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());
    DIGITS_RE
        .find_iter(filename)
        .filter(|m| m.as_str().len() == 4 && m.as_str().starts_with('2'))
        .filter_map(|m| m.as_str().parse().ok())
        .next()
}

/// Resolve the reference year for one file, first match wins: override table,
/// a `year` column in the data, a year in the filename, the dataset's end
/// year. Returns the year and its provenance label.
pub fn resolve_reference_year(
    params: &FileParams,
    record: &SourceFileRecord,
    end_year: Option<i32>,
) -> (i32, &'static str) {
    if let Some(year) = params.reference_year {
        return (year, YEAR_FROM_EXCEPTION);
    }
    if let Some(col) = record
        .headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("year"))
    {
        if let Some(year) = record
            .rows
            .iter()
            .find_map(|row| row.get(col).and_then(|v| v.trim().parse::<i32>().ok()))
        {
            return (year, YEAR_FROM_DATE_HEADER);
        }
    }
    if let Some(year) = resource_year(&record.filename) {
        return (year, YEAR_FROM_RESOURCE_NAME);
    }
    (
        end_year.unwrap_or_else(|| Utc::now().year()),
        YEAR_FROM_DATASET_DATE,
    )
}

fn parse_population(raw: &str) -> Option<u64> {
    let cleaned = raw.replace(',', "");
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.trunc() as u64)
}

/// Fields that identify an observation; two rows agreeing on all of them are
/// duplicates whatever their population or provenance says.
fn country_key(row: &HarmonizedRow) -> String {
    let mut key = vec![
        row.iso3.clone(),
        row.admin_level.to_string(),
        row.population_group.clone(),
        row.gender.clone(),
        row.age_range.clone(),
    ];
    key.extend(row.adm_pcode.iter().cloned());
    key.extend(row.adm_name.iter().cloned());
    key.join("\u{1f}")
}

/// Reshape one decoded source file onto the canonical schema. Unknown or
/// missing admin columns stay blank; population cells must coerce to a
/// non-negative integer or the run fails naming file and row.
pub fn harmonize(
    record: &SourceFileRecord,
    config: &Configuration,
    country: &CountryContext,
    reference_year: i32,
    encoding: &str,
    report: &mut RunReport,
) -> Result<Vec<HarmonizedRow>> {
    let level = record.admin_level as usize;

    // locate the pcode and name column for each ancestor admin level
    let mut code_idx: [Option<usize>; 4] = [None; 4];
    let mut name_idx: [Option<usize>; 4] = [None; 4];
    for k in 1..=level {
        match code_headers(&record.headers, k as u8).first().copied() {
            Some(header) => {
                code_idx[k - 1] = record.headers.iter().position(|h| h == header);
            }
            None => report.add_warning(
                &country.dataset_name,
                format!("adm{k} code header not found in adm{level}"),
            ),
        }
        match name_headers(&record.headers, k as u8, &config.non_latin_alphabets)
            .first()
            .copied()
        {
            Some(header) => {
                name_idx[k - 1] = record.headers.iter().position(|h| h == header);
            }
            None => report.add_warning(
                &country.dataset_name,
                format!("adm{k} name header not found in adm{level}"),
            ),
        }
    }

    for header in &record.headers {
        if !is_population_header(header) {
            report.add_nonmatching_header(&country.iso3, header);
        }
    }
    let population_columns: Vec<(usize, &String)> = record
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| is_population_header(h))
        .collect();

    let repair_names = decode::is_latin1(encoding);
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;

    for (row_idx, row) in record.rows.iter().enumerate() {
        let Some(first) = row.iter().find(|cell| !cell.trim().is_empty()) else {
            continue;
        };
        // embedded HXL tag rows in the source are not data
        if first.contains('#') {
            continue;
        }

        let mut adm_pcode: [String; 4] = Default::default();
        let mut adm_name: [String; 4] = Default::default();
        for k in 1..=level {
            if let Some(i) = code_idx[k - 1] {
                adm_pcode[k - 1] = row.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
            }
            if let Some(i) = name_idx[k - 1] {
                let name = row.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
                adm_name[k - 1] = if repair_names {
                    decode::repair_latin1(&name)
                } else {
                    name
                };
            }
        }

        for &(col, header) in &population_columns {
            let Some(raw) = row.get(col) else { continue };
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let population = if raw.eq_ignore_ascii_case("na") {
                report.add_warning(
                    &country.dataset_name,
                    format!("adm{level} has NA population values"),
                );
                0
            } else {
                parse_population(raw).ok_or_else(|| ScraperError::Schema {
                    filename: record.filename.clone(),
                    row: row_idx + 2,
                    reason: format!(
                        "population value {raw:?} in column {header} is not a non-negative number"
                    ),
                })?
            };

            let (gender, age_range) = gender_and_age_range(header);
            let (age_min, age_max) = min_and_max_age(&age_range);
            if let (Some(lo), Some(hi)) = (age_min, age_max) {
                if hi < lo {
                    report.add_warning(
                        &country.dataset_name,
                        format!("adm{level} has weird header {header}"),
                    );
                    continue;
                }
            }

            let harmonized = HarmonizedRow {
                iso3: country.iso3.clone(),
                country: country.country.clone(),
                adm_pcode: adm_pcode.clone(),
                adm_name: adm_name.clone(),
                population_group: header.to_uppercase(),
                gender,
                age_range,
                age_min,
                age_max,
                population,
                reference_year,
                source: country.source.clone(),
                contributor: country.contributor.clone(),
                admin_level: record.admin_level,
            };
            if !seen.insert(country_key(&harmonized)) {
                duplicates += 1;
            }
            out.push(harmonized);
        }
    }

    // duplicates are warned about, never resolved here: curators own that
    if duplicates > 0 {
        report.add_warning(
            &country.dataset_name,
            format!("{duplicates} duplicate values found in adm{level}"),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::parse_file;
    use std::collections::HashMap;

    fn test_config() -> Configuration {
        let hxl_tags = crate::schema::COLUMNS
            .iter()
            .map(|c| (c.to_string(), format!("#{}", c.to_lowercase())))
            .collect();
        let hapi_hxl_tags = crate::publish::hapi::COLUMNS
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
            encoding_exceptions: HashMap::new(),
            reference_year_exceptions: HashMap::new(),
            non_latin_alphabets: vec!["ar".into(), "ru".into()],
            known_errors: vec![],
        }
    }

    fn test_country(iso3: &str) -> CountryContext {
        CountryContext {
            iso3: iso3.into(),
            dataset_name: format!("cod-ps-{}", iso3.to_lowercase()),
            country: "Testland".into(),
            source: "National census".into(),
            contributor: "OCHA Testland".into(),
            end_year: Some(2020),
        }
    }

    #[test]
    fn gender_and_age_range_covers_the_naming_zoo() {
        assert_eq!(gender_and_age_range("T_TL"), ("all".into(), "all".into()));
        assert_eq!(gender_and_age_range("F_TL"), ("f".into(), "all".into()));
        assert_eq!(gender_and_age_range("F_00_04"), ("f".into(), "0-4".into()));
        assert_eq!(gender_and_age_range("f_4045"), ("f".into(), "40-45".into()));
        assert_eq!(gender_and_age_range("m_80plus"), ("m".into(), "80+".into()));
        assert_eq!(gender_and_age_range("M_80_plus"), ("m".into(), "80+".into()));
        assert_eq!(gender_and_age_range("f_00"), ("f".into(), "0-0".into()));
        assert_eq!(
            gender_and_age_range("M_100"),
            ("m".into(), "100-100".into())
        );
    }

    #[test]
    fn age_bounds() {
        assert_eq!(min_and_max_age("all"), (None, None));
        assert_eq!(min_and_max_age("unknown"), (None, None));
        assert_eq!(min_and_max_age("0-4"), (Some(0), Some(4)));
        assert_eq!(min_and_max_age("80+"), (Some(80), None));
    }

    #[test]
    fn population_header_patterns() {
        for header in ["T_TL", "f_tl", "F_00_04", "m_05_09", "T_80plus", "f_4045"] {
            assert!(is_population_header(header), "{header}");
        }
        for header in ["ADM1_PCODE", "ADM1_EN", "year", "F_TL_2", "x_00_04"] {
            assert!(!is_population_header(header), "{header}");
        }
    }

    #[test]
    fn admin_header_detection_prefers_latin_names() {
        let headers: Vec<String> = ["ADM1_PCODE", "ADM1_EN", "ADM1_AR", "T_TL"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(code_headers(&headers, 1), vec!["ADM1_PCODE"]);
        assert_eq!(
            name_headers(&headers, 1, &["ar".to_string()]),
            vec!["ADM1_EN"]
        );

        let headers: Vec<String> = ["admin2Pcode", "ADM2_FR", "ADM2_AR", "T_TL"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(code_headers(&headers, 2), vec!["admin2Pcode"]);
        assert_eq!(
            name_headers(&headers, 2, &["ar".to_string()]),
            vec!["ADM2_FR"]
        );
    }

    #[test]
    fn year_from_filename_ignores_other_digit_runs() {
        assert_eq!(resource_year("caf_admpop_adm1_2015_v2.csv"), Some(2015));
        assert_eq!(resource_year("cod_admpop_adm0_2020.csv"), Some(2020));
        assert_eq!(resource_year("xyz_admpop_adm1.csv"), None);
        assert_eq!(resource_year("abc_12345_adm1.csv"), None);
        assert_eq!(resource_year("abc_1999_adm1.csv"), None);
    }

    #[test]
    fn reference_year_precedence() {
        let config = test_config();
        let record = parse_file(
            "tst_admpop_adm0_2019.csv",
            "TST",
            0,
            "year,T_TL\n2017,1000\n",
        )
        .unwrap();

        // override table wins over everything
        let params = FileParams {
            encoding: "utf-8".into(),
            reference_year: Some(2009),
        };
        assert_eq!(
            resolve_reference_year(&params, &record, Some(2020)),
            (2009, YEAR_FROM_EXCEPTION)
        );

        // then the year column
        let params = config.resolve_file_params("tst_admpop_adm0_2019.csv");
        assert_eq!(
            resolve_reference_year(&params, &record, Some(2020)),
            (2017, YEAR_FROM_DATE_HEADER)
        );

        // then the filename, then the dataset date
        let record = parse_file("tst_admpop_adm0_2019.csv", "TST", 0, "T_TL\n1000\n").unwrap();
        assert_eq!(
            resolve_reference_year(&params, &record, Some(2020)),
            (2019, YEAR_FROM_RESOURCE_NAME)
        );
        let record = parse_file("tst_admpop_adm0.csv", "TST", 0, "T_TL\n1000\n").unwrap();
        assert_eq!(
            resolve_reference_year(&params, &record, Some(2020)),
            (2020, YEAR_FROM_DATASET_DATE)
        );
    }

    #[test]
    fn harmonize_maps_admin_columns_and_blanks_deeper_levels() {
        let config = test_config();
        let country = test_country("CAF");
        let mut report = RunReport::new();
        let record = parse_file(
            "caf_admpop_adm2_2015_v2.csv",
            "CAF",
            2,
            "ADM1_PCODE,ADM1_EN,ADM2_PCODE,ADM2_EN,T_TL,F_TL\n\
             CF22,Nana Mambere,CF224,Abba,\"28,016\",14200\n",
        )
        .unwrap();

        let rows =
            harmonize(&record, &config, &country, 2015, "utf-8", &mut report).unwrap();
        assert_eq!(rows.len(), 2);
        let total = &rows[0];
        assert_eq!(total.adm_pcode[0], "CF22");
        assert_eq!(total.adm_name[1], "Abba");
        assert_eq!(total.adm_pcode[2], "");
        assert_eq!(total.adm_name[3], "");
        assert_eq!(total.population, 28016);
        assert_eq!(total.population_group, "T_TL");
        assert_eq!(total.gender, "all");
        assert_eq!(rows[1].gender, "f");
        assert_eq!(total.reference_year, 2015);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn negative_population_is_a_schema_error() {
        let config = test_config();
        let country = test_country("TST");
        let mut report = RunReport::new();
        let record =
            parse_file("tst_admpop_adm0_2020.csv", "TST", 0, "T_TL\n-5\n").unwrap();
        let err = harmonize(&record, &config, &country, 2020, "utf-8", &mut report).unwrap_err();
        match err {
            ScraperError::Schema { filename, row, .. } => {
                assert_eq!(filename, "tst_admpop_adm0_2020.csv");
                assert_eq!(row, 2);
            }
            other => panic!("expected schema error, got {other}"),
        }
    }

    #[test]
    fn na_population_becomes_zero_with_a_warning() {
        let config = test_config();
        let country = test_country("TST");
        let mut report = RunReport::new();
        let record =
            parse_file("tst_admpop_adm0_2020.csv", "TST", 0, "T_TL\nNA\n").unwrap();
        let rows = harmonize(&record, &config, &country, 2020, "utf-8", &mut report).unwrap();
        assert_eq!(rows[0].population, 0);
        assert!(report.warnings[0].message.contains("NA population"));
    }

    #[test]
    fn embedded_hxl_rows_and_duplicates() {
        let config = test_config();
        let country = test_country("TST");
        let mut report = RunReport::new();
        let record = parse_file(
            "tst_admpop_adm1_2020.csv",
            "TST",
            1,
            "ADM1_PCODE,ADM1_EN,T_TL\n\
             #adm1+code,#adm1+name,#population\n\
             TS01,North,100\n\
             TS01,North,100\n",
        )
        .unwrap();
        let rows = harmonize(&record, &config, &country, 2020, "utf-8", &mut report).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.message.contains("1 duplicate values found in adm1")));
    }

    #[test]
    fn missing_code_header_warns_and_stays_blank() {
        let config = test_config();
        let country = test_country("TST");
        let mut report = RunReport::new();
        let record = parse_file(
            "tst_admpop_adm1_2020.csv",
            "TST",
            1,
            "region_name,T_TL\nNorth,100\n",
        )
        .unwrap();
        let rows = harmonize(&record, &config, &country, 2020, "utf-8", &mut report).unwrap();
        assert_eq!(rows[0].adm_pcode[0], "");
        assert!(report
            .warnings
            .iter()
            .any(|w| w.message.contains("adm1 code header not found")));
    }
}
