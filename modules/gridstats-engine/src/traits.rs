// Trait abstractions for the pipeline's backend dependencies.
//
// CellStore — the output table: cell rows, raw_data payloads, property
//   columns, geometry bookkeeping.
// LandMask — the read-only land boundary: clipping and overlap tests.
// PointSource — the input dataset: approximate-order KNN retrieval.
//
// These enable deterministic testing with MockCellStore, MockLandMask and
// MockPointSource: no Postgres, no PostGIS, no Docker.

use async_trait::async_trait;

use gridstats_core::{CellSpec, NeighborRecord, Property, Result};

/// A persisted cell whose `raw_data` is still NULL. `lon`/`lat` is the
/// representative point: the stored point itself, or the bbox midpoint of
/// the stored polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpopulatedCell {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
}

/// A populated cell whose properties have not been computed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UncalculatedCell {
    pub id: i64,
    pub raw_data: serde_json::Value,
}

#[async_trait]
pub trait CellStore: Send + Sync {
    /// True if the output table holds any rows at all. Gate for the
    /// generate-and-clip stage, which runs at most once per target.
    async fn has_rows(&self) -> Result<bool>;

    /// Insert one cell with its full, unclipped envelope geometry.
    async fn insert_envelope(&self, cell: &CellSpec) -> Result<()>;

    /// Insert one cell with a clipped geometry returned by the land mask,
    /// as EWKT.
    async fn insert_clipped(&self, ewkt: &str) -> Result<()>;

    /// Bulk-insert centroid points, one cell row each.
    async fn insert_point_batch(&self, points: &[(f64, f64)]) -> Result<()>;

    /// Remove every point cell not contained in the land boundary.
    /// Returns the number of rows removed.
    async fn delete_points_outside_land(&self) -> Result<u64>;

    /// Cells with NULL `raw_data`, keyset-paginated by id ascending.
    async fn unpopulated_cells(&self, after_id: i64, limit: i64) -> Result<Vec<UnpopulatedCell>>;

    /// Store a cell's raw neighbor payload. `[]` means populated-empty.
    async fn store_raw_data(&self, id: i64, raw_data: &serde_json::Value) -> Result<()>;

    /// Populated cells with `properties_calculated = FALSE`,
    /// keyset-paginated by id ascending.
    async fn uncalculated_cells(&self, after_id: i64, limit: i64) -> Result<Vec<UncalculatedCell>>;

    /// Persist all computed properties and set `properties_calculated` in
    /// one statement.
    async fn store_properties(&self, id: i64, properties: &[Property]) -> Result<()>;

    /// Reset `properties_calculated` for every row. Returns rows affected.
    async fn reset_calculated_flags(&self) -> Result<u64>;

    /// Current geometry column type (e.g. "POINT", "MULTIPOLYGON"), if the
    /// column is registered.
    async fn geometry_type(&self) -> Result<Option<String>>;

    /// Rewrite point geometries as their cell envelopes (multipolygons).
    async fn points_to_polygons(&self, increment: f64) -> Result<()>;
}

#[async_trait]
pub trait LandMask: Send + Sync {
    /// Clip a cell envelope against the land boundary. Returns the areal
    /// part of the intersection as EWKT, or `None` when the cell is sea
    /// (or the intersection has no 2-D part).
    async fn clip_envelope(&self, cell: &CellSpec) -> Result<Option<String>>;

    /// Coarse bounding-box overlap test, for the clip-disabled path.
    async fn overlaps(&self, cell: &CellSpec) -> Result<bool>;
}

#[async_trait]
pub trait PointSource: Send + Sync {
    /// The K nearest input points to `(lon, lat)`, with great-circle
    /// distances in meters. Ordering is approximate — the index order is a
    /// performance hint, and callers must re-sort by true distance.
    async fn nearest(&self, lon: f64, lat: f64, k: usize) -> Result<Vec<NeighborRecord>>;
}
