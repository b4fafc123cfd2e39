//! The grid aggregation pipeline: stages, controller, and the PostGIS
//! backends behind the `CellStore` / `LandMask` / `PointSource` seams.

pub mod aggregate;
pub mod clip;
pub mod pg;
pub mod pipeline;
pub mod populate;
pub mod schema;
pub mod testing;
pub mod traits;


pub use aggregate::{calculate_properties, AggregateStats};
pub use clip::{generate_and_clip, ClipStats};
pub use pg::{PgCellStore, PgLandMask, PgPointSource};
pub use pipeline::{Pipeline, PipelineStats};
pub use populate::{populate_raw_data, PopulateStats};
pub use schema::ensure_schema;
pub use traits::{CellStore, LandMask, PointSource, UncalculatedCell, UnpopulatedCell};
