//! Derived HAPI-style dataset: the subset of harmonized rows at admin
//! levels 0-2, reshaped onto the HAPI column vocabulary with explicit
//! reference periods.

use chrono::NaiveDate;

use crate::process::HarmonizedRow;
use crate::report::RunReport;

pub const LOCATION_CODE: &str = "location_code";
pub const PROVIDER_ADMIN1_NAME: &str = "provider_admin1_name";
pub const PROVIDER_ADMIN2_NAME: &str = "provider_admin2_name";
pub const HAPI_GENDER: &str = "gender";
pub const HAPI_AGE_RANGE: &str = "age_range";
pub const MIN_AGE: &str = "min_age";
pub const MAX_AGE: &str = "max_age";
pub const HAPI_POPULATION: &str = "population";
pub const REFERENCE_PERIOD_START: &str = "reference_period_start";
pub const REFERENCE_PERIOD_END: &str = "reference_period_end";

pub const COLUMNS: [&str; 10] = [
    LOCATION_CODE,
    PROVIDER_ADMIN1_NAME,
    PROVIDER_ADMIN2_NAME,
    HAPI_GENDER,
    HAPI_AGE_RANGE,
    MIN_AGE,
    MAX_AGE,
    HAPI_POPULATION,
    REFERENCE_PERIOD_START,
    REFERENCE_PERIOD_END,
];

/// Deepest admin level carried into the derived dataset.
pub const MAX_LEVEL: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct HapiRow {
    pub location_code: String,
    pub provider_admin1_name: String,
    pub provider_admin2_name: String,
    pub gender: String,
    pub age_range: String,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub population: u64,
    pub reference_period_start: NaiveDate,
    pub reference_period_end: NaiveDate,
}

impl HapiRow {
    pub fn csv_record(&self) -> Vec<String> {
        vec![
            self.location_code.clone(),
            self.provider_admin1_name.clone(),
            self.provider_admin2_name.clone(),
            self.gender.clone(),
            self.age_range.clone(),
            self.min_age.map(|a| a.to_string()).unwrap_or_default(),
            self.max_age.map(|a| a.to_string()).unwrap_or_default(),
            self.population.to_string(),
            self.reference_period_start.format("%Y-%m-%d").to_string(),
            self.reference_period_end.format("%Y-%m-%d").to_string(),
        ]
    }
}

/// Reference years map to calendar-year periods.
fn reference_period(year: i32) -> (NaiveDate, NaiveDate) {
    // Jan 1 and Dec 31 exist in every year; the unwraps cannot fire
    (
        NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
    )
}

/// Derive the HAPI rows from the combined table. Subnational rows missing
/// their own pcode are kept but flagged: downstream joins need that code.
pub fn derive_rows(rows: &[HarmonizedRow], report: &mut RunReport) -> Vec<HapiRow> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if row.admin_level > MAX_LEVEL {
            continue;
        }
        if row.admin_level > 0 {
            let own_pcode = &row.adm_pcode[row.admin_level as usize - 1];
            if own_pcode.is_empty() {
                report.add_warning(
                    &format!("cod-ps-{}", row.iso3.to_lowercase()),
                    format!(
                        "admin {} pcode missing for {}",
                        row.admin_level,
                        row.adm_name[row.admin_level as usize - 1]
                    ),
                );
            }
        }
        let (start, end) = reference_period(row.reference_year);
        out.push(HapiRow {
            location_code: row.iso3.clone(),
            provider_admin1_name: row.adm_name[0].clone(),
            provider_admin2_name: row.adm_name[1].clone(),
            gender: row.gender.clone(),
            age_range: row.age_range.clone(),
            min_age: row.age_min,
            max_age: row.age_max,
            population: row.population,
            reference_period_start: start,
            reference_period_end: end,
        });
    }
    out
}
