//! Typed pipeline configuration.
//!
//! Validation happens here, before any backend interaction: a bad bounding
//! box or a malformed land reference must never reach the database.

use crate::error::{GridStatsError, Result};

/// Geographic extent of the grid, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridExtent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    /// Cell edge length in degrees.
    pub increment: f64,
}

impl GridExtent {
    pub fn new(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        increment: f64,
    ) -> Result<Self> {
        let extent = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
            increment,
        };
        extent.validate()?;
        Ok(extent)
    }

    fn validate(&self) -> Result<()> {
        if self.min_lon >= self.max_lon {
            return Err(GridStatsError::Config(format!(
                "left ({}) must be less than right ({})",
                self.min_lon, self.max_lon
            )));
        }
        if self.min_lat >= self.max_lat {
            return Err(GridStatsError::Config(format!(
                "bottom ({}) must be less than top ({})",
                self.min_lat, self.max_lat
            )));
        }
        if self.increment <= 0.0 || !self.increment.is_finite() {
            return Err(GridStatsError::Config(format!(
                "increment must be positive, got {}",
                self.increment
            )));
        }
        Ok(())
    }

    /// Cell count along the longitude axis.
    pub fn cols(&self) -> usize {
        ((self.max_lon - self.min_lon) / self.increment).ceil() as usize
    }

    /// Cell count along the latitude axis.
    pub fn rows(&self) -> usize {
        ((self.max_lat - self.min_lat) / self.increment).ceil() as usize
    }
}

/// Whether cells are persisted as clipped polygons or centroid points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryMode {
    Polygon,
    Point,
}

impl std::str::FromStr for GeometryMode {
    type Err = GridStatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "polygon" => Ok(GeometryMode::Polygon),
            "point" => Ok(GeometryMode::Point),
            other => Err(GridStatsError::Config(format!(
                "geometry mode must be 'polygon' or 'point', got '{other}'"
            ))),
        }
    }
}

/// A `table.geometry_column` reference to the land boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LandRef {
    pub table: String,
    pub geom_col: String,
}

impl std::str::FromStr for LandRef {
    type Err = GridStatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((table, col)) if !table.is_empty() && !col.is_empty() => Ok(LandRef {
                table: table.to_string(),
                geom_col: col.to_string(),
            }),
            _ => Err(GridStatsError::Config(format!(
                "land reference must be 'table.geom_column', got '{s}'"
            ))),
        }
    }
}

/// Everything the pipeline needs besides the extent and the aggregator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_table: String,
    pub output_geom_col: String,
    pub geometry_mode: GeometryMode,
    pub land: LandRef,
    pub input_table: String,
    pub input_geom_col: String,
    pub srid: i32,
    /// Clip cell envelopes against the coastline, or keep whole envelopes
    /// on any overlap.
    pub cut_land_boxes: bool,
    pub start_from_scratch: bool,
    /// K for the nearest-neighbor retrieval.
    pub rows_to_take: usize,
    pub recalculate_all: bool,
    /// Convert a point-geometry table to cell envelopes for visualization.
    /// Applied at most once; detected via the stored geometry column type.
    pub points_to_polygons: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rows_to_take == 0 {
            return Err(GridStatsError::Config(
                "rows-to-take must be at least 1".into(),
            ));
        }
        if self.output_table.is_empty() || self.input_table.is_empty() {
            return Err(GridStatsError::Config(
                "output and input table names are required".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_rejects_inverted_bbox() {
        assert!(GridExtent::new(10.0, 50.0, -10.0, 52.0, 1.0).is_err());
        assert!(GridExtent::new(-10.0, 52.0, -8.0, 50.0, 1.0).is_err());
    }

    #[test]
    fn extent_rejects_non_positive_increment() {
        assert!(GridExtent::new(-10.0, 50.0, -8.0, 52.0, 0.0).is_err());
        assert!(GridExtent::new(-10.0, 50.0, -8.0, 52.0, -0.5).is_err());
    }

    #[test]
    fn cell_counts_use_ceiling() {
        let extent = GridExtent::new(0.0, 0.0, 1.0, 1.0, 0.3).unwrap();
        assert_eq!(extent.cols(), 4);
        assert_eq!(extent.rows(), 4);
    }

    #[test]
    fn land_ref_parses_table_and_column() {
        let land: LandRef = "land_polygons.the_geom".parse().unwrap();
        assert_eq!(land.table, "land_polygons");
        assert_eq!(land.geom_col, "the_geom");
        assert!("no_dot_here".parse::<LandRef>().is_err());
        assert!(".the_geom".parse::<LandRef>().is_err());
    }
}
