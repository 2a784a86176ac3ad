// src/publish/mod.rs
//
// Output side of the run: write the tagged CSVs and register them on the
// platform. Writing always happens; uploading is skipped without an API key
// so dry runs leave the files on disk for inspection.

pub mod hapi;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::config::Configuration;
use crate::error::Result;
use crate::fetch::HdxClient;
use crate::process::HarmonizedRow;
use crate::report::RunReport;
use crate::schema;

pub const POPULATION_CSV: &str = "cod_population_global.csv";
pub const HAPI_CSV: &str = "hdx_hapi_population_global.csv";

/// Marker the platform uses for standard-compliant COD datasets.
const COD_LEVEL: &str = "cod-standard";

/// Write a header row, its HXL tag row, then the data. The BOM is part of
/// the contract: spreadsheet tools mis-sniff plain UTF-8.
pub fn write_tagged_csv<I>(
    path: &Path,
    headers: &[&str],
    tags: &[String],
    records: I,
) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut file = File::create(path)?;
    file.write_all(b"\xef\xbb\xbf")?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(headers)?;
    writer.write_record(tags)?;
    for record in records {
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the combined population CSV into `out_dir`.
pub fn write_population_csv(
    out_dir: &Path,
    config: &Configuration,
    rows: &[HarmonizedRow],
) -> Result<PathBuf> {
    let tags = schema::tag_row(&config.hxl_tags)?;
    let path = out_dir.join(POPULATION_CSV);
    write_tagged_csv(
        &path,
        &schema::COLUMNS,
        &tags,
        rows.iter().map(HarmonizedRow::csv_record),
    )?;
    info!(path = %path.display(), rows = rows.len(), "wrote population csv");
    Ok(path)
}

/// Derive and write the HAPI CSV into `out_dir`.
pub fn write_hapi_csv(
    out_dir: &Path,
    config: &Configuration,
    rows: &[HarmonizedRow],
    report: &mut RunReport,
) -> Result<PathBuf> {
    let tags = schema::tag_row_for(&hapi::COLUMNS, &config.hapi_hxl_tags)?;
    let hapi_rows = hapi::derive_rows(rows, report);
    let path = out_dir.join(HAPI_CSV);
    write_tagged_csv(
        &path,
        &hapi::COLUMNS,
        &tags,
        hapi_rows.iter().map(hapi::HapiRow::csv_record),
    )?;
    info!(path = %path.display(), rows = hapi_rows.len(), "wrote hapi csv");
    Ok(path)
}

fn dataset_date(year_min: i32, year_max: i32) -> String {
    format!("[{year_min}-01-01 TO {year_max}-12-31]")
}

fn dataset_body(
    name: &str,
    title: &str,
    tags: &[String],
    countries: &[String],
    year_min: i32,
    year_max: i32,
    cod_level: Option<&str>,
) -> Value {
    let mut body = json!({
        "name": name,
        "title": title,
        "tags": tags.iter().map(|t| json!({"name": t})).collect::<Vec<_>>(),
        "groups": countries
            .iter()
            .map(|c| json!({"name": c.to_lowercase()}))
            .collect::<Vec<_>>(),
        "dataset_date": dataset_date(year_min, year_max),
    });
    if let Some(level) = cod_level {
        body["cod_level"] = json!(level);
    }
    body
}

/// Create or update one dataset and upload one CSV resource onto it.
async fn upsert_dataset_with_resource(
    hdx: &HdxClient,
    body: Value,
    resource_name: &str,
    resource_description: &str,
    csv_path: &Path,
) -> Result<()> {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let existing = hdx.read_dataset(&name).await?;
    let dataset = match existing {
        Some(dataset) => {
            let mut body = body;
            body["id"] = json!(dataset.id);
            hdx.post_action("package_update", body).await?
        }
        None => hdx.post_action("package_create", body).await?,
    };
    let dataset_id = dataset
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(&name)
        .to_string();
    hdx.upload_resource(&dataset_id, resource_name, resource_description, csv_path)
        .await?;
    info!(dataset = %name, resource = resource_name, "published");
    Ok(())
}

/// Register both datasets and upload their CSVs. Without an API key the
/// call degrades to a warning; the files are already on disk.
#[instrument(level = "info", skip_all)]
pub async fn publish_datasets(
    hdx: &HdxClient,
    config: &Configuration,
    countries: &[String],
    year_min: i32,
    year_max: i32,
    population_csv: &Path,
    hapi_csv: &Path,
) -> Result<()> {
    if !hdx.can_write() {
        warn!("no API key configured; skipping upload, output left on disk");
        return Ok(());
    }

    let body = dataset_body(
        &config.dataset_name,
        &config.dataset_title,
        &config.tags,
        countries,
        year_min,
        year_max,
        Some(COD_LEVEL),
    );
    upsert_dataset_with_resource(hdx, body, POPULATION_CSV, " ", population_csv).await?;

    let body = dataset_body(
        &config.hapi_dataset_name,
        &config.hapi_dataset_title,
        &config.tags,
        countries,
        year_min,
        year_max,
        None,
    );
    upsert_dataset_with_resource(
        hdx,
        body,
        &config.hapi_resource_name,
        &config.hapi_resource_description,
        hapi_csv,
    )
    .await?;
    Ok(())
}
