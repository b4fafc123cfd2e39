//! In-memory mocks for the three backend traits.
//!
//! MockCellStore (CellStore) — stateful in-memory output table.
//! MockLandMask (LandMask) — rectangle-based land boundary.
//! MockPointSource (PointSource) — fixed point set with haversine
//! distances, optionally returned in scrambled order to exercise the
//! client-side re-sort.
//!
//! No Postgres, no PostGIS, no Docker. `cargo test` in seconds.

use std::sync::Mutex;

use async_trait::async_trait;

use gridstats_core::{CellSpec, NeighborRecord, Property, Result};

use crate::traits::{CellStore, LandMask, PointSource, UncalculatedCell, UnpopulatedCell};

// ---------------------------------------------------------------------------
// MockCellStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum MockGeometry {
    Envelope(CellSpec),
    Clipped(String),
    Point(f64, f64),
}

#[derive(Debug, Clone)]
pub struct MockCell {
    pub id: i64,
    /// Representative point (bbox midpoint for polygons).
    pub lon: f64,
    pub lat: f64,
    pub geometry: MockGeometry,
    pub raw_data: Option<serde_json::Value>,
    pub properties_calculated: bool,
    pub properties: Vec<Property>,
}

#[derive(Default)]
struct StoreState {
    cells: Vec<MockCell>,
    next_id: i64,
    geometry_type: Option<String>,
    point_batch_sizes: Vec<usize>,
}

/// In-memory output table. Ids are assigned sequentially from 1, matching
/// the BIGSERIAL behavior the keyset pagination relies on.
pub struct MockCellStore {
    state: Mutex<StoreState>,
    /// Land containment rectangle for the point-mode delete pass.
    /// `None` means every point is kept.
    land_box: Option<[f64; 4]>,
}

impl MockCellStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            land_box: None,
        }
    }

    /// Points outside this `[min_lon, min_lat, max_lon, max_lat]` rectangle
    /// are removed by `delete_points_outside_land`.
    pub fn with_land_box(mut self, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        self.land_box = Some([min_lon, min_lat, max_lon, max_lat]);
        self
    }

    /// Seed a cell row directly, bypassing the clip stage. Returns its id.
    pub fn seed_cell(
        &self,
        lon: f64,
        lat: f64,
        raw_data: Option<serde_json::Value>,
        properties_calculated: bool,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.cells.push(MockCell {
            id,
            lon,
            lat,
            geometry: MockGeometry::Point(lon, lat),
            raw_data,
            properties_calculated,
            properties: Vec::new(),
        });
        id
    }

    pub fn cells(&self) -> Vec<MockCell> {
        self.state.lock().unwrap().cells.clone()
    }

    pub fn cell(&self, id: i64) -> MockCell {
        self.cells()
            .into_iter()
            .find(|c| c.id == id)
            .unwrap_or_else(|| panic!("no cell with id {id}"))
    }

    pub fn point_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().point_batch_sizes.clone()
    }

    fn push(&self, lon: f64, lat: f64, geometry: MockGeometry, geometry_type: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.geometry_type = Some(geometry_type.to_string());
        state.cells.push(MockCell {
            id,
            lon,
            lat,
            geometry,
            raw_data: None,
            properties_calculated: false,
            properties: Vec::new(),
        });
    }
}

impl Default for MockCellStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CellStore for MockCellStore {
    async fn has_rows(&self) -> Result<bool> {
        Ok(!self.state.lock().unwrap().cells.is_empty())
    }

    async fn insert_envelope(&self, cell: &CellSpec) -> Result<()> {
        let (lon, lat) = cell.centroid();
        self.push(lon, lat, MockGeometry::Envelope(cell.clone()), "MULTIPOLYGON");
        Ok(())
    }

    async fn insert_clipped(&self, ewkt: &str) -> Result<()> {
        let (min_lon, min_lat, max_lon, max_lat) = ewkt_bbox(ewkt);
        self.push(
            (min_lon + max_lon) / 2.0,
            (min_lat + max_lat) / 2.0,
            MockGeometry::Clipped(ewkt.to_string()),
            "MULTIPOLYGON",
        );
        Ok(())
    }

    async fn insert_point_batch(&self, points: &[(f64, f64)]) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .point_batch_sizes
            .push(points.len());
        for &(lon, lat) in points {
            self.push(lon, lat, MockGeometry::Point(lon, lat), "POINT");
        }
        Ok(())
    }

    async fn delete_points_outside_land(&self) -> Result<u64> {
        let Some([min_lon, min_lat, max_lon, max_lat]) = self.land_box else {
            return Ok(0);
        };
        let mut state = self.state.lock().unwrap();
        let before = state.cells.len();
        state.cells.retain(|c| {
            c.lon >= min_lon && c.lon <= max_lon && c.lat >= min_lat && c.lat <= max_lat
        });
        Ok((before - state.cells.len()) as u64)
    }

    async fn unpopulated_cells(&self, after_id: i64, limit: i64) -> Result<Vec<UnpopulatedCell>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cells
            .iter()
            .filter(|c| c.raw_data.is_none() && c.id > after_id)
            .take(limit as usize)
            .map(|c| UnpopulatedCell {
                id: c.id,
                lon: c.lon,
                lat: c.lat,
            })
            .collect())
    }

    async fn store_raw_data(&self, id: i64, raw_data: &serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(cell) = state.cells.iter_mut().find(|c| c.id == id) {
            cell.raw_data = Some(raw_data.clone());
        }
        Ok(())
    }

    async fn uncalculated_cells(&self, after_id: i64, limit: i64) -> Result<Vec<UncalculatedCell>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cells
            .iter()
            .filter(|c| !c.properties_calculated && c.raw_data.is_some() && c.id > after_id)
            .take(limit as usize)
            .map(|c| UncalculatedCell {
                id: c.id,
                raw_data: c.raw_data.clone().unwrap(),
            })
            .collect())
    }

    async fn store_properties(&self, id: i64, properties: &[Property]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(cell) = state.cells.iter_mut().find(|c| c.id == id) {
            cell.properties = properties.to_vec();
            cell.properties_calculated = true;
        }
        Ok(())
    }

    async fn reset_calculated_flags(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut reset = 0u64;
        for cell in state.cells.iter_mut() {
            if cell.properties_calculated {
                cell.properties_calculated = false;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn geometry_type(&self) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().geometry_type.clone())
    }

    async fn points_to_polygons(&self, increment: f64) -> Result<()> {
        let half = increment / 2.0;
        let mut state = self.state.lock().unwrap();
        state.geometry_type = Some("MULTIPOLYGON".to_string());
        for cell in state.cells.iter_mut() {
            if let MockGeometry::Point(lon, lat) = cell.geometry {
                cell.geometry = MockGeometry::Envelope(CellSpec {
                    min_lon: lon - half,
                    min_lat: lat - half,
                    max_lon: lon + half,
                    max_lat: lat + half,
                });
            }
        }
        Ok(())
    }
}

/// Recover the bbox of a mock EWKT polygon by scanning its coordinates.
fn ewkt_bbox(ewkt: &str) -> (f64, f64, f64, f64) {
    let body = ewkt.split_once(';').map(|(_, b)| b).unwrap_or(ewkt);
    let coords: Vec<f64> = body
        .split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .filter_map(|s| s.parse().ok())
        .collect();
    let xs = coords.iter().step_by(2);
    let ys = coords.iter().skip(1).step_by(2);
    (
        xs.clone().cloned().fold(f64::INFINITY, f64::min),
        ys.clone().cloned().fold(f64::INFINITY, f64::min),
        xs.cloned().fold(f64::NEG_INFINITY, f64::max),
        ys.cloned().fold(f64::NEG_INFINITY, f64::max),
    )
}

// ---------------------------------------------------------------------------
// MockLandMask
// ---------------------------------------------------------------------------

/// Land boundary made of axis-aligned rectangles. An empty mask is all
/// sea.
pub struct MockLandMask {
    boxes: Vec<[f64; 4]>,
}

impl MockLandMask {
    pub fn new() -> Self {
        Self { boxes: Vec::new() }
    }

    pub fn with_box(mut self, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        self.boxes.push([min_lon, min_lat, max_lon, max_lat]);
        self
    }
}

impl Default for MockLandMask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LandMask for MockLandMask {
    async fn clip_envelope(&self, cell: &CellSpec) -> Result<Option<String>> {
        for [min_lon, min_lat, max_lon, max_lat] in &self.boxes {
            let x0 = cell.min_lon.max(*min_lon);
            let y0 = cell.min_lat.max(*min_lat);
            let x1 = cell.max_lon.min(*max_lon);
            let y1 = cell.max_lat.min(*max_lat);
            // Areal intersection only; a shared edge is a degenerate
            // artifact and is dropped, like ST_CollectionExtract(_, 3).
            if x1 > x0 && y1 > y0 {
                return Ok(Some(format!(
                    "SRID=4326;POLYGON(({x0} {y0},{x1} {y0},{x1} {y1},{x0} {y1},{x0} {y0}))"
                )));
            }
        }
        Ok(None)
    }

    async fn overlaps(&self, cell: &CellSpec) -> Result<bool> {
        Ok(self.boxes.iter().any(|[min_lon, min_lat, max_lon, max_lat]| {
            cell.min_lon <= *max_lon
                && cell.max_lon >= *min_lon
                && cell.min_lat <= *max_lat
                && cell.max_lat >= *min_lat
        }))
    }
}

// ---------------------------------------------------------------------------
// MockPointSource
// ---------------------------------------------------------------------------

/// Fixed input points with true haversine distances. With `scrambled()`
/// the K nearest come back in reversed order, imitating an approximate
/// index walk that callers must not trust.
pub struct MockPointSource {
    points: Vec<(f64, f64, Vec<String>)>,
    scrambled: bool,
}

impl MockPointSource {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            scrambled: false,
        }
    }

    pub fn with_point(mut self, lon: f64, lat: f64, attrs: &[&str]) -> Self {
        self.points
            .push((lon, lat, attrs.iter().map(|a| a.to_string()).collect()));
        self
    }

    pub fn scrambled(mut self) -> Self {
        self.scrambled = true;
        self
    }
}

impl Default for MockPointSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PointSource for MockPointSource {
    async fn nearest(&self, lon: f64, lat: f64, k: usize) -> Result<Vec<NeighborRecord>> {
        let mut records: Vec<NeighborRecord> = self
            .points
            .iter()
            .map(|(plon, plat, attrs)| {
                NeighborRecord::new(haversine_m(lon, lat, *plon, *plat), attrs.clone())
            })
            .collect();
        records.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        records.truncate(k);
        if self.scrambled {
            records.reverse();
        }
        Ok(records)
    }
}

/// Great-circle distance in meters.
pub fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}
