use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gridstats_core::{
    probe_schema, Aggregator, GeometryMode, GridExtent, LandRef, PipelineConfig, ReligionMetrics,
};
use gridstats_engine::{ensure_schema, PgCellStore, PgLandMask, PgPointSource, Pipeline};

#[derive(Parser)]
#[command(name = "gridstats", about = "Grid-binned statistics over a geospatial point dataset")]
struct Cli {
    /// Grid cell edge length in degrees
    #[arg(short, long, default_value_t = 1.0)]
    increment: f64,

    /// Bounding box, degrees
    #[arg(short, long, default_value_t = 90.0)]
    top: f64,
    #[arg(short, long, default_value_t = -90.0)]
    bottom: f64,
    #[arg(short, long, default_value_t = -180.0)]
    left: f64,
    #[arg(short, long, default_value_t = 180.0)]
    right: f64,

    /// Land boundary reference, as table.geom_column
    #[arg(long)]
    land: String,

    #[arg(long)]
    output_table: String,

    #[arg(long, default_value = "the_geom")]
    output_geom_col: String,

    /// Persist cells as clipped polygons or centroid points
    #[arg(long, default_value = "polygon")]
    geometry_mode: GeometryMode,

    /// Input point dataset table
    #[arg(long)]
    input_table: String,

    #[arg(long, default_value = "the_geom")]
    input_geom_col: String,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, default_value_t = 4326)]
    srid: i32,

    /// Keep whole cell envelopes on any land overlap instead of clipping
    /// them to the coastline
    #[arg(long)]
    no_cut_land_boxes: bool,

    /// Drop and re-create the output table before running
    #[arg(long)]
    start_from_scratch: bool,

    /// Nearest neighbors to retrieve per cell
    #[arg(long, default_value_t = 100)]
    rows_to_take: usize,

    /// Reset properties_calculated for every row, then recompute
    #[arg(long)]
    recalculate_all: bool,

    /// Convert point cells to envelope polygons after aggregation
    #[arg(long)]
    points_to_polygons: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Validate everything before the first backend interaction.
    let extent = GridExtent::new(cli.left, cli.bottom, cli.right, cli.top, cli.increment)?;
    let land: LandRef = cli.land.parse()?;
    let config = PipelineConfig {
        output_table: cli.output_table,
        output_geom_col: cli.output_geom_col,
        geometry_mode: cli.geometry_mode,
        land,
        input_table: cli.input_table,
        input_geom_col: cli.input_geom_col,
        srid: cli.srid,
        cut_land_boxes: !cli.no_cut_land_boxes,
        start_from_scratch: cli.start_from_scratch,
        rows_to_take: cli.rows_to_take,
        recalculate_all: cli.recalculate_all,
        points_to_polygons: cli.points_to_polygons,
    };
    config.validate()?;

    let aggregator = ReligionMetrics;
    let schema = probe_schema(&aggregator);

    info!(
        table = config.output_table.as_str(),
        cells = extent.cols() * extent.rows(),
        properties = schema.len(),
        "starting gridstats pipeline"
    );

    // One logical session for the whole run; concurrent runs against the
    // same output table are not supported.
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&cli.database_url)
        .await?;

    ensure_schema(&pool, &config, &schema).await?;

    let store = PgCellStore::new(pool.clone(), &config)?;
    let land_mask = PgLandMask::new(pool.clone(), &config)?;
    let source = PgPointSource::new(pool.clone(), &config, aggregator.input_columns())?;

    let pipeline = Pipeline::new(extent, &config, &aggregator, &store, &land_mask, &source)?;
    let stats = pipeline.run().await?;

    info!(
        cells_kept = stats.clip.kept,
        populated = stats.populate.populated,
        calculated = stats.aggregate.calculated,
        "pipeline complete"
    );

    pool.close().await;
    Ok(())
}
