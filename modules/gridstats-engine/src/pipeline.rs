//! The pipeline controller: fixed stage order, per-stage commits.
//!
//! generate & clip (once) → populate raw data (incremental) → calculate
//! properties (incremental) → optional geometry normalization. A later
//! stage never re-executes work an earlier run already committed; the
//! NULL/flag checks inside each stage are the sole recovery mechanism
//! after interruption.

use tracing::info;

use gridstats_core::{Aggregator, GeometryMode, GridExtent, PipelineConfig, Result};

use crate::aggregate::{calculate_properties, AggregateStats};
use crate::clip::{generate_and_clip, ClipStats};
use crate::populate::{populate_raw_data, PopulateStats};
use crate::traits::{CellStore, LandMask, PointSource};

#[derive(Debug, Default, PartialEq)]
pub struct PipelineStats {
    pub clip: ClipStats,
    pub populate: PopulateStats,
    pub aggregate: AggregateStats,
    pub geometry_normalized: bool,
}

/// Explicit composition in place of the old mixin stack: the extent, the
/// aggregation function and the three backend seams are all injected at
/// construction.
pub struct Pipeline<'a> {
    extent: GridExtent,
    config: &'a PipelineConfig,
    aggregator: &'a dyn Aggregator,
    store: &'a dyn CellStore,
    land: &'a dyn LandMask,
    source: &'a dyn PointSource,
}

impl<'a> Pipeline<'a> {
    /// Fails on invalid configuration before any backend interaction.
    pub fn new(
        extent: GridExtent,
        config: &'a PipelineConfig,
        aggregator: &'a dyn Aggregator,
        store: &'a dyn CellStore,
        land: &'a dyn LandMask,
        source: &'a dyn PointSource,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extent,
            config,
            aggregator,
            store,
            land,
            source,
        })
    }

    pub async fn run(&self) -> Result<PipelineStats> {
        let clip = generate_and_clip(
            self.store,
            self.land,
            self.extent,
            self.config.geometry_mode,
            self.config.cut_land_boxes,
        )
        .await?;

        let populate =
            populate_raw_data(self.store, self.source, self.config.rows_to_take).await?;

        let aggregate =
            calculate_properties(self.store, self.aggregator, self.config.recalculate_all).await?;

        let geometry_normalized = self.normalize_geometry().await?;

        Ok(PipelineStats {
            clip,
            populate,
            aggregate,
            geometry_normalized,
        })
    }

    /// Point→polygon conversion for visualization, at most once. The
    /// stored geometry column type is the done-marker: once the column is
    /// MULTIPOLYGON there is nothing left to convert.
    async fn normalize_geometry(&self) -> Result<bool> {
        if !self.config.points_to_polygons {
            return Ok(false);
        }
        if self.config.geometry_mode != GeometryMode::Point {
            info!("geometry normalization only applies to point mode, skipping");
            return Ok(false);
        }
        match self.store.geometry_type().await? {
            Some(ty) if ty.eq_ignore_ascii_case("point") => {
                info!("converting point cells to envelope polygons");
                self.store.points_to_polygons(self.extent.increment).await?;
                Ok(true)
            }
            Some(ty) => {
                info!(current = ty.as_str(), "geometry already normalized, skipping");
                Ok(false)
            }
            None => {
                info!("geometry column not registered, skipping normalization");
                Ok(false)
            }
        }
    }
}
