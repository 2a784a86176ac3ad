// src/fetch/mod.rs
//
// The fetch collaborator: everything that talks to the data exchange
// platform lives here. The rest of the pipeline only ever sees filenames
// and bytes.

pub mod datasets;
pub mod resources;

pub use datasets::{CountryDataset, HdxClient, ResourceInfo};
pub use resources::select_resource;

use std::time::Duration;

use reqwest::Client;
use tokio::time::sleep;
use tracing::{error, warn};
use url::Url;

use crate::error::Result;

/// Production site of the humanitarian data exchange.
pub const HDX_SITE_URL: &str = "https://data.humdata.org";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// GET with bounded exponential backoff. Mutating calls never go through
/// here; they are not safe to replay blindly.
pub(crate) async fn get_bytes_with_retry(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let mut attempts = 0;
    loop {
        match get_bytes(client, url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempts < MAX_RETRIES => {
                attempts += 1;
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempts - 1);
                warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "retrying");
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                error!(%url, error = %e, "exhausted retries");
                return Err(e);
            }
        }
    }
}

async fn get_bytes(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let resp = client
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
