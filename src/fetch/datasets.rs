//! Dataset discovery against the CKAN action API: find every per-country
//! COD population dataset, read its metadata, and pick the CSV resource for
//! each admin level.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{Result, ScraperError};
use crate::fetch::get_bytes_with_retry;

/// Prefix shared by every per-country COD population dataset.
pub const DATASET_PREFIX: &str = "cod-ps-";

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub format: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountryDataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub cod_level: Option<String>,
    #[serde(default)]
    pub dataset_date: Option<String>,
    #[serde(default)]
    pub dataset_source: Option<String>,
    #[serde(default)]
    pub organization: Option<Organization>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub resources: Vec<ResourceInfo>,
}

impl CountryDataset {
    /// ISO3 code from the dataset name, e.g. `cod-ps-caf` -> `CAF`. Names
    /// with any other suffix (the global dataset itself, test datasets) get
    /// `None`.
    pub fn iso3(&self) -> Option<String> {
        let suffix = self.name.strip_prefix(DATASET_PREFIX)?;
        if suffix.len() == 3 && suffix.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(suffix.to_ascii_uppercase())
        } else {
            None
        }
    }

    /// End year of the declared time period, from strings like
    /// `[2015-01-01T00:00:00 TO 2020-12-31T23:59:59]`.
    pub fn end_year(&self) -> Option<i32> {
        static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").unwrap());
        let date = self.dataset_date.as_deref()?;
        YEAR_RE
            .find_iter(date)
            .filter_map(|m| m.as_str().parse().ok())
            .last()
    }

    /// Country display name, from the dataset's country group (datasets on
    /// the platform carry exactly one), falling back to the title prefix of
    /// "<Country> - Subnational Population Statistics".
    pub fn country_name(&self) -> Option<String> {
        self.groups
            .first()
            .and_then(|g| g.display_name.clone().or_else(|| g.title.clone()))
            .or_else(|| {
                self.title
                    .split_once(" - ")
                    .map(|(country, _)| country.to_string())
            })
    }

    /// CSV resources whose name targets the given admin level.
    pub fn csv_resources_for_level(&self, level: u8) -> Vec<&ResourceInfo> {
        let re = Regex::new(&format!(r"(?i).*adm(in)?{level}.*")).unwrap();
        self.resources
            .iter()
            .filter(|r| r.format.eq_ignore_ascii_case("csv") && re.is_match(&r.name))
            .collect()
    }
}

/// Thin client for the CKAN action API. Reads retry; writes do not.
pub struct HdxClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HdxClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            api_key,
        })
    }

    /// Writes need an API key; without one the run stays read-only.
    pub fn can_write(&self) -> bool {
        self.api_key.is_some()
    }

    fn action_url(&self, action: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("api/3/action/{action}"))?)
    }

    /// Unwrap the CKAN envelope: `{"success": bool, "result": ...}`.
    fn envelope(action: &str, value: Value) -> Result<Value> {
        if value.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(ScraperError::Api(format!(
                "{action} failed: {}",
                value.get("error").unwrap_or(&Value::Null)
            )));
        }
        value
            .get("result")
            .cloned()
            .ok_or_else(|| ScraperError::Api(format!("{action} returned no result")))
    }

    async fn get_action(&self, action: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut url = self.action_url(action)?;
        url.query_pairs_mut().extend_pairs(params);
        let bytes = get_bytes_with_retry(&self.client, &url).await?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ScraperError::Api(format!("{action}: invalid JSON: {e}")))?;
        Self::envelope(action, value)
    }

    /// Every active, COD-marked per-country population dataset, in
    /// ascending ISO3 (= name) order, so the whole run is deterministic.
    #[instrument(level = "info", skip(self))]
    pub async fn list_population_datasets(&self) -> Result<Vec<CountryDataset>> {
        let fq = format!("name:{DATASET_PREFIX}*");
        let mut datasets: Vec<CountryDataset> = Vec::new();
        let mut start = 0usize;
        loop {
            let rows = PAGE_SIZE.to_string();
            let offset = start.to_string();
            let result = self
                .get_action(
                    "package_search",
                    &[("fq", fq.as_str()), ("rows", &rows), ("start", &offset)],
                )
                .await?;
            let count = result
                .get("count")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let batch: Vec<CountryDataset> = serde_json::from_value(
                result.get("results").cloned().unwrap_or(Value::Array(vec![])),
            )
            .map_err(|e| ScraperError::Api(format!("package_search: bad results: {e}")))?;
            let fetched = batch.len();
            datasets.extend(batch);
            start += fetched;
            if fetched == 0 || start >= count {
                break;
            }
        }

        let total = datasets.len();
        datasets.retain(|d| d.iso3().is_some() && !d.archived && d.cod_level.is_some());
        datasets.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            kept = datasets.len(),
            skipped = total - datasets.len(),
            "discovered population datasets"
        );
        Ok(datasets)
    }

    /// Read one dataset by name; `None` when the platform has no such
    /// dataset (the normal case before the first publish).
    pub async fn read_dataset(&self, name: &str) -> Result<Option<CountryDataset>> {
        let mut url = self.action_url("package_show")?;
        url.query_pairs_mut().append_pair("id", name);
        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: Value = resp.error_for_status()?.json().await?;
        let result = Self::envelope("package_show", value)?;
        let dataset = serde_json::from_value(result)
            .map_err(|e| ScraperError::Api(format!("package_show: bad result: {e}")))?;
        Ok(Some(dataset))
    }

    /// Download one resource's raw bytes.
    pub async fn download_resource(&self, resource: &ResourceInfo) -> Result<Vec<u8>> {
        let url = Url::parse(&resource.url)?;
        debug!(name = %resource.name, "downloading resource");
        get_bytes_with_retry(&self.client, &url).await
    }

    /// POST a mutating action, authenticated. No retry: replaying a create
    /// can duplicate state on the platform.
    pub async fn post_action(&self, action: &str, body: Value) -> Result<Value> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            ScraperError::Api(format!("{action} requires an API key"))
        })?;
        let url = self.action_url(action)?;
        let value: Value = self
            .client
            .post(url)
            .header("Authorization", key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Self::envelope(action, value)
    }

    /// Upload a file as a new resource on `dataset_id`.
    pub async fn upload_resource(
        &self,
        dataset_id: &str,
        name: &str,
        description: &str,
        path: &std::path::Path,
    ) -> Result<Value> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            ScraperError::Api("resource_create requires an API key".to_string())
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("package_id", dataset_id.to_string())
            .text("name", name.to_string())
            .text("description", description.to_string())
            .text("format", "csv".to_string())
            .part(
                "upload",
                reqwest::multipart::Part::bytes(std::fs::read(path)?).file_name(filename),
            );
        let url = self.action_url("resource_create")?;
        let value: Value = self
            .client
            .post(url)
            .header("Authorization", key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Self::envelope("resource_create", value)
    }
}
