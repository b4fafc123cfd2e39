//! Grid generation: the ordered sequence of candidate cells covering an
//! extent.
//!
//! Ordering is row-major — south→north over latitude, west→east inside
//! each row — and deterministic. Downstream stages rely on that only for
//! reproducibility and progress reporting, never for semantics.
//!
//! Cells step by index (`min + i * increment`) rather than by accumulating
//! floats, so the candidate count is exactly
//! `ceil(lon_span / inc) * ceil(lat_span / inc)`.

use crate::config::GridExtent;

/// One candidate cell, before land clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSpec {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl CellSpec {
    /// Bbox midpoint, the representative point for neighbor search.
    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    /// WKT polygon of the full cell envelope, counter-clockwise ring.
    pub fn envelope_wkt(&self) -> String {
        format!(
            "POLYGON(({minx} {miny},{maxx} {miny},{maxx} {maxy},{minx} {maxy},{minx} {miny}))",
            minx = self.min_lon,
            miny = self.min_lat,
            maxx = self.max_lon,
            maxy = self.max_lat,
        )
    }

    /// WKT point of the centroid.
    pub fn centroid_wkt(&self) -> String {
        let (lon, lat) = self.centroid();
        format!("POINT({lon} {lat})")
    }
}

/// Lazy, restartable iterator over the candidate cells of an extent.
pub struct Grid {
    extent: GridExtent,
    cols: usize,
    rows: usize,
    next_index: usize,
}

impl Grid {
    pub fn new(extent: GridExtent) -> Self {
        let cols = extent.cols();
        let rows = extent.rows();
        Self {
            extent,
            cols,
            rows,
            next_index: 0,
        }
    }

    /// Total candidate cells before clipping.
    pub fn cell_count(&self) -> usize {
        self.cols * self.rows
    }
}

impl Iterator for Grid {
    type Item = CellSpec;

    fn next(&mut self) -> Option<CellSpec> {
        if self.next_index >= self.cols * self.rows {
            return None;
        }
        let row = self.next_index / self.cols;
        let col = self.next_index % self.cols;
        self.next_index += 1;

        let inc = self.extent.increment;
        let min_lon = self.extent.min_lon + col as f64 * inc;
        let min_lat = self.extent.min_lat + row as f64 * inc;
        Some(CellSpec {
            min_lon,
            min_lat,
            max_lon: min_lon + inc,
            max_lat: min_lat + inc,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cols * self.rows - self.next_index;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridExtent;

    fn extent(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        increment: f64,
    ) -> GridExtent {
        GridExtent::new(min_lon, min_lat, max_lon, max_lat, increment).unwrap()
    }

    #[test]
    fn four_cell_example_grid_in_row_major_order() {
        let cells: Vec<CellSpec> = Grid::new(extent(-10.0, 50.0, -8.0, 52.0, 1.0)).collect();
        assert_eq!(cells.len(), 4);
        // South row first, west to east; then the north row.
        assert_eq!((cells[0].min_lon, cells[0].min_lat), (-10.0, 50.0));
        assert_eq!((cells[0].max_lon, cells[0].max_lat), (-9.0, 51.0));
        assert_eq!((cells[1].min_lon, cells[1].min_lat), (-9.0, 50.0));
        assert_eq!((cells[2].min_lon, cells[2].min_lat), (-10.0, 51.0));
        assert_eq!((cells[3].min_lon, cells[3].min_lat), (-9.0, 51.0));
        assert_eq!((cells[3].max_lon, cells[3].max_lat), (-8.0, 52.0));
    }

    #[test]
    fn cell_count_matches_ceiling_formula() {
        // Span not divisible by the increment: 2.5/0.4 → ceil = 7 per axis.
        let grid = Grid::new(extent(0.0, 0.0, 2.5, 2.5, 0.4));
        assert_eq!(grid.cell_count(), 49);
        assert_eq!(grid.count(), 49);
    }

    #[test]
    fn centroid_is_bbox_midpoint() {
        let cell = Grid::new(extent(-10.0, 50.0, -8.0, 52.0, 1.0))
            .next()
            .unwrap();
        assert_eq!(cell.centroid(), (-9.5, 50.5));
    }

    #[test]
    fn fractional_increment_avoids_accumulation_drift() {
        // 0.1 is not exactly representable; index-based stepping keeps the
        // last cell aligned with the extent edge within one ulp-ish bound.
        let cells: Vec<CellSpec> = Grid::new(extent(-10.9, 51.1, -4.7, 55.9, 0.1)).collect();
        assert_eq!(cells.len(), 62 * 48);
        let last = cells.last().unwrap();
        assert!((last.max_lon - -4.7).abs() < 1e-9);
        assert!((last.max_lat - 55.9).abs() < 1e-9);
    }

    #[test]
    fn envelope_wkt_closes_the_ring() {
        let cell = CellSpec {
            min_lon: -10.0,
            min_lat: 50.0,
            max_lon: -9.0,
            max_lat: 51.0,
        };
        assert_eq!(
            cell.envelope_wkt(),
            "POLYGON((-10 50,-9 50,-9 51,-10 51,-10 50))"
        );
        assert_eq!(cell.centroid_wkt(), "POINT(-9.5 50.5)");
    }
}
