//! Stage: generate the candidate grid and clip it to the land boundary.
//!
//! Runs at most once per output target. If the table already holds rows,
//! the whole stage is a no-op — that prior-completion check is the only
//! resumability mechanism here; there is no per-cell resume for clipping.

use tracing::{debug, info};

use gridstats_core::{GeometryMode, Grid, GridExtent, Result};

use crate::traits::{CellStore, LandMask};

/// Point-mode insert batch size. Bounds per-statement cost; the
/// containment filter then runs as a single batched delete.
const POINT_BATCH: usize = 10_000;

#[derive(Debug, Default, PartialEq)]
pub struct ClipStats {
    pub candidates: usize,
    pub kept: usize,
    /// True when the stage found existing rows and did nothing.
    pub skipped: bool,
}

pub async fn generate_and_clip(
    store: &dyn CellStore,
    land: &dyn LandMask,
    extent: GridExtent,
    mode: GeometryMode,
    cut_land_boxes: bool,
) -> Result<ClipStats> {
    if store.has_rows().await? {
        info!("output table already has rows, not re-creating land cells");
        return Ok(ClipStats {
            skipped: true,
            ..ClipStats::default()
        });
    }

    let grid = Grid::new(extent);
    let candidates = grid.cell_count();
    info!(candidates, ?mode, "generating candidate grid");

    let kept = match mode {
        GeometryMode::Point => clip_points(store, grid).await?,
        GeometryMode::Polygon => clip_polygons(store, land, grid, cut_land_boxes, candidates).await?,
    };

    info!(candidates, kept, "grid generation and clipping complete");
    Ok(ClipStats {
        candidates,
        kept,
        skipped: false,
    })
}

/// Insert-then-filter: bulk-insert every centroid, then remove the ones
/// the land boundary does not contain in one batched pass. Much cheaper
/// than a per-point containment test at this scale.
async fn clip_points(store: &dyn CellStore, grid: Grid) -> Result<usize> {
    let mut batch: Vec<(f64, f64)> = Vec::with_capacity(POINT_BATCH);
    let mut inserted = 0usize;
    for cell in grid {
        batch.push(cell.centroid());
        if batch.len() == POINT_BATCH {
            store.insert_point_batch(&batch).await?;
            inserted += batch.len();
            debug!(inserted, "point batch flushed");
            batch.clear();
        }
    }
    if !batch.is_empty() {
        store.insert_point_batch(&batch).await?;
        inserted += batch.len();
    }

    let removed = store.delete_points_outside_land().await?;
    info!(inserted, removed, "removed points outside the land boundary");
    Ok(inserted - removed as usize)
}

async fn clip_polygons(
    store: &dyn CellStore,
    land: &dyn LandMask,
    grid: Grid,
    cut_land_boxes: bool,
    candidates: usize,
) -> Result<usize> {
    let progress_every = (candidates / 20).max(1);
    let mut kept = 0usize;

    for (done, cell) in grid.enumerate() {
        if done % progress_every == 0 && done > 0 {
            info!(
                done,
                candidates,
                kept,
                percent = done * 100 / candidates,
                "clipping"
            );
        }

        if cut_land_boxes {
            // Sea cells and degenerate (line/point) intersections come
            // back as None and are never materialized.
            if let Some(ewkt) = land.clip_envelope(&cell).await? {
                store.insert_clipped(&ewkt).await?;
                kept += 1;
            }
        } else if land.overlaps(&cell).await? {
            // Coarse mode: keep the whole envelope on any overlap.
            store.insert_envelope(&cell).await?;
            kept += 1;
        }
    }
    Ok(kept)
}
