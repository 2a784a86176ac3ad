use anyhow::{Context, Result};
use codscraper::{
    config::Configuration,
    fetch::{self, HdxClient},
    process::{Collector, CountryContext},
    publish,
    schema::MAX_ADMIN_LEVEL,
};
use std::{env, fs, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const CONFIG_PATH: &str = "config/project.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,codscraper=info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();
    info!("startup");

    // ─── 2) configuration, validated before any network I/O ─────────
    let config = Configuration::from_path(CONFIG_PATH)
        .with_context(|| format!("loading {CONFIG_PATH}"))?;

    let out_dir = PathBuf::from("output");
    fs::create_dir_all(&out_dir)?;

    // ─── 3) platform client ──────────────────────────────────────────
    let hdx = HdxClient::new(fetch::HDX_SITE_URL, env::var("HDX_API_KEY").ok())?;

    // ─── 4) discover per-country datasets ────────────────────────────
    let datasets = hdx
        .list_population_datasets()
        .await
        .context("discovering population datasets")?;
    info!("{} country datasets to process", datasets.len());

    // ─── 5) download and harmonize, one file at a time ───────────────
    let mut collector = Collector::new(&config);
    for dataset in &datasets {
        let Some(iso3) = dataset.iso3() else { continue };
        info!(iso3 = %iso3, "downloading population data");

        let country = CountryContext {
            iso3: iso3.clone(),
            dataset_name: dataset.name.clone(),
            country: dataset.country_name().unwrap_or_else(|| iso3.clone()),
            source: dataset.dataset_source.clone().unwrap_or_default(),
            contributor: dataset
                .organization
                .as_ref()
                .map(|o| o.title.clone())
                .unwrap_or_default(),
            end_year: dataset.end_year(),
        };

        let mut missing_levels = Vec::new();
        for level in 0..=MAX_ADMIN_LEVEL {
            let candidates = dataset.csv_resources_for_level(level);
            let Some(resource) = fetch::select_resource(&candidates) else {
                missing_levels.push(level);
                continue;
            };
            let bytes = match hdx.download_resource(resource).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(iso3 = %iso3, resource = %resource.name, error = %e, "download failed");
                    collector.report.add_warning(
                        &dataset.name,
                        format!("download failed for {}", resource.name),
                    );
                    continue;
                }
            };
            collector
                .ingest_file(&country, level, &resource.name, &bytes)
                .with_context(|| format!("processing {}", resource.name))?;
        }
        collector.finish_country(&country, &missing_levels);
    }

    // ─── 6) combine and write the outputs ────────────────────────────
    let countries = collector.countries.clone();
    let year_min = collector.reference_years.iter().min().copied();
    let year_max = collector.reference_years.iter().max().copied();
    let (rows, mut report) = collector.into_combined();
    info!(rows = rows.len(), countries = countries.len(), "combined");

    let population_csv = publish::write_population_csv(&out_dir, &config, &rows)?;
    let hapi_csv = publish::write_hapi_csv(&out_dir, &config, &rows, &mut report)?;

    // ─── 7) register datasets and upload ─────────────────────────────
    match (year_min, year_max) {
        (Some(year_min), Some(year_max)) => {
            publish::publish_datasets(
                &hdx,
                &config,
                &countries,
                year_min,
                year_max,
                &population_csv,
                &hapi_csv,
            )
            .await
            .context("publishing datasets")?;
        }
        _ => warn!("no rows collected; nothing to publish"),
    }

    // ─── 8) report ───────────────────────────────────────────────────
    report.log_summary();
    info!("finished processing");
    Ok(())
}
