//! Resource selection. Countries occasionally leave several vintages of the
//! same admin level online; the collector wants exactly one file per level.

use tracing::debug;

use crate::fetch::ResourceInfo;
use crate::process::harmonize::resource_year;

/// Pick the resource to download for one admin level. With one candidate the
/// choice is made; with several, the latest 4-digit year in the filename
/// wins, first listed on a tie (or when no name carries a year).
pub fn select_resource<'a>(candidates: &[&'a ResourceInfo]) -> Option<&'a ResourceInfo> {
    match candidates {
        [] => None,
        [only] => Some(only),
        several => {
            // min of Reverse(year): first listed wins a tie
            let best = several
                .iter()
                .min_by_key(|r| std::cmp::Reverse(resource_year(&r.name).unwrap_or(-1)))
                .copied();
            if let Some(chosen) = best {
                debug!(
                    chosen = %chosen.name,
                    out_of = several.len(),
                    "several resources matched, kept the latest"
                );
            }
            best
        }
    }
}
