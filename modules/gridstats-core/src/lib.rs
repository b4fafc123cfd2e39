//! Pure logic for the grid aggregation pipeline: grid generation,
//! neighbor records, metric aggregation, configuration, errors.
//!
//! Zero knowledge of Postgres or PostGIS. Everything here is
//! deterministic and unit-testable without a database.

pub mod config;
pub mod error;
pub mod grid;
pub mod metrics;
pub mod neighbors;

pub use config::{GeometryMode, GridExtent, LandRef, PipelineConfig};
pub use error::{GridStatsError, Result};
pub use grid::{CellSpec, Grid};
pub use metrics::{probe_schema, Aggregator, Property, PropertyKind, PropertyValue, ReligionMetrics};
pub use neighbors::{from_raw_json, sort_neighbors, to_raw_json, NeighborRecord};
