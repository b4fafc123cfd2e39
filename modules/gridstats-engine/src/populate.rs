//! Stage: populate each cell's raw nearest-neighbor data.
//!
//! Touches only rows where `raw_data IS NULL`, so an interrupted run
//! resumes exactly where it stopped. A cell that genuinely has no
//! neighbors gets an explicit empty payload — never left NULL, or the
//! stage would retry it forever.

use tracing::info;

use gridstats_core::{sort_neighbors, to_raw_json, Result};

use crate::traits::{CellStore, PointSource};

/// Keyset page size for the NULL-raw-data scan.
const FETCH_BATCH: i64 = 1_000;

#[derive(Debug, Default, PartialEq)]
pub struct PopulateStats {
    pub populated: usize,
    /// Cells stored with a zero-neighbor payload.
    pub empty: usize,
}

pub async fn populate_raw_data(
    store: &dyn CellStore,
    source: &dyn PointSource,
    rows_to_take: usize,
) -> Result<PopulateStats> {
    let mut stats = PopulateStats::default();
    let mut after_id = 0i64;

    loop {
        let cells = store.unpopulated_cells(after_id, FETCH_BATCH).await?;
        let Some(last) = cells.last() else {
            break;
        };
        after_id = last.id;

        for cell in &cells {
            let mut neighbors = source.nearest(cell.lon, cell.lat, rows_to_take).await?;
            // The backend's KNN order is approximate; true distance order
            // is restored here. Stable sort keeps retrieval order on ties.
            sort_neighbors(&mut neighbors);

            if neighbors.is_empty() {
                stats.empty += 1;
            }
            store.store_raw_data(cell.id, &to_raw_json(&neighbors)).await?;
            stats.populated += 1;
        }

        info!(populated = stats.populated, "raw data progress");
    }

    info!(
        populated = stats.populated,
        empty = stats.empty,
        "raw data population complete"
    );
    Ok(stats)
}
