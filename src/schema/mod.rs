//! Canonical output schema. Every source file, whatever its column layout,
//! is reshaped onto these columns in this order. The HXL tag row is generated
//! from the configured tag map and must cover every column.

use std::collections::HashMap;

use crate::error::{Result, ScraperError};

pub const ISO3: &str = "ISO3";
pub const COUNTRY: &str = "Country";
pub const ADM1_PCODE: &str = "ADM1_PCODE";
pub const ADM1_NAME: &str = "ADM1_NAME";
pub const ADM2_PCODE: &str = "ADM2_PCODE";
pub const ADM2_NAME: &str = "ADM2_NAME";
pub const ADM3_PCODE: &str = "ADM3_PCODE";
pub const ADM3_NAME: &str = "ADM3_NAME";
pub const ADM4_PCODE: &str = "ADM4_PCODE";
pub const ADM4_NAME: &str = "ADM4_NAME";
pub const POPULATION_GROUP: &str = "Population_group";
pub const GENDER: &str = "Gender";
pub const AGE_RANGE: &str = "Age_range";
pub const AGE_MIN: &str = "Age_min";
pub const AGE_MAX: &str = "Age_max";
pub const POPULATION: &str = "Population";
pub const REFERENCE_YEAR: &str = "Reference_year";
pub const SOURCE: &str = "Source";
pub const CONTRIBUTOR: &str = "Contributor";

/// Header row of the combined output, in emission order.
pub const COLUMNS: [&str; 19] = [
    ISO3,
    COUNTRY,
    ADM1_PCODE,
    ADM1_NAME,
    ADM2_PCODE,
    ADM2_NAME,
    ADM3_PCODE,
    ADM3_NAME,
    ADM4_PCODE,
    ADM4_NAME,
    POPULATION_GROUP,
    GENDER,
    AGE_RANGE,
    AGE_MIN,
    AGE_MAX,
    POPULATION,
    REFERENCE_YEAR,
    SOURCE,
    CONTRIBUTOR,
];

/// Deepest admin level carried by the schema.
pub const MAX_ADMIN_LEVEL: u8 = 4;

/// Build the HXL tag row for `headers` from the configured tag map.
/// A header without a tag entry is a configuration error: a partially
/// tagged file is worse than a failed run.
pub fn tag_row_for(headers: &[&str], hxl_tags: &HashMap<String, String>) -> Result<Vec<String>> {
    headers
        .iter()
        .map(|header| {
            hxl_tags.get(*header).cloned().ok_or_else(|| {
                ScraperError::Config(format!("no HXL tag configured for column {header}"))
            })
        })
        .collect()
}

/// Tag row for the canonical population columns.
pub fn tag_row(hxl_tags: &HashMap<String, String>) -> Result<Vec<String>> {
    tag_row_for(&COLUMNS, hxl_tags)
}
