//! Output-table bookkeeping: create-if-absent, probe-driven property
//! columns, schema evolution, supporting indexes.
//!
//! Property columns come from the aggregator's schema probe, so the table
//! shape is fully determined before any real data is touched.

use std::collections::HashSet;

use sqlx::PgPool;
use tracing::{info, warn};

use gridstats_core::{GeometryMode, GridStatsError, PipelineConfig, PropertyKind, Result};

use crate::pg::quote_ident;

fn column_type(kind: PropertyKind) -> &'static str {
    match kind {
        PropertyKind::Text => "TEXT",
        PropertyKind::Numeric => "DOUBLE PRECISION",
    }
}

/// Ensure the output table exists with bookkeeping columns, one column per
/// probed property, and the supporting indexes. Idempotent; with
/// `start_from_scratch` the table is dropped first.
pub async fn ensure_schema(
    pool: &PgPool,
    config: &PipelineConfig,
    schema: &[(String, PropertyKind)],
) -> Result<()> {
    let table = quote_ident(&config.output_table)?;
    let geom = quote_ident(&config.output_geom_col)?;

    if config.start_from_scratch {
        warn!(table = config.output_table.as_str(), "start-from-scratch: dropping output table");
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(pool)
            .await
            .map_err(GridStatsError::backend)?;
    }

    let exists = sqlx::query("SELECT 1 FROM pg_catalog.pg_tables WHERE tablename = $1 LIMIT 1")
        .bind(&config.output_table)
        .fetch_optional(pool)
        .await
        .map_err(GridStatsError::backend)?
        .is_some();

    if exists {
        info!(table = config.output_table.as_str(), "output table already exists");
        add_missing_columns(pool, config, schema, &table).await?;
    } else {
        create_table(pool, config, schema, &table, &geom).await?;
    }

    create_indexes(pool, config, &table, &geom).await?;
    Ok(())
}

async fn create_table(
    pool: &PgPool,
    config: &PipelineConfig,
    schema: &[(String, PropertyKind)],
    table: &str,
    geom: &str,
) -> Result<()> {
    info!(
        table = config.output_table.as_str(),
        properties = schema.len(),
        "creating output table"
    );

    sqlx::query(&format!(
        r#"
        CREATE TABLE {table} (
            id BIGSERIAL PRIMARY KEY,
            raw_data JSONB DEFAULT NULL,
            properties_calculated BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#
    ))
    .execute(pool)
    .await
    .map_err(GridStatsError::backend)?;

    let geom_type = match config.geometry_mode {
        GeometryMode::Polygon => "MultiPolygon",
        GeometryMode::Point => "Point",
    };
    sqlx::query(&format!(
        "ALTER TABLE {table} ADD COLUMN {geom} geometry({geom_type}, {srid})",
        srid = config.srid,
    ))
    .execute(pool)
    .await
    .map_err(GridStatsError::backend)?;

    for (name, kind) in schema {
        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN {col} {ty} DEFAULT NULL",
            col = quote_ident(name)?,
            ty = column_type(*kind),
        ))
        .execute(pool)
        .await
        .map_err(GridStatsError::backend)?;
    }
    Ok(())
}

/// Schema evolution: an aggregator can grow new properties between runs;
/// existing rows keep NULL until the next recalculation.
async fn add_missing_columns(
    pool: &PgPool,
    config: &PipelineConfig,
    schema: &[(String, PropertyKind)],
    table: &str,
) -> Result<()> {
    let existing: HashSet<String> = sqlx::query_as::<_, (String,)>(
        "SELECT column_name FROM information_schema.columns WHERE table_name = $1",
    )
    .bind(&config.output_table)
    .fetch_all(pool)
    .await
    .map_err(GridStatsError::backend)?
    .into_iter()
    .map(|(name,)| name)
    .collect();

    for (name, kind) in schema {
        if existing.contains(name) {
            continue;
        }
        info!(column = name.as_str(), kind = %kind, "adding new property column");
        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN {col} {ty} DEFAULT NULL",
            col = quote_ident(name)?,
            ty = column_type(*kind),
        ))
        .execute(pool)
        .await
        .map_err(GridStatsError::backend)?;
    }
    Ok(())
}

async fn create_indexes(
    pool: &PgPool,
    config: &PipelineConfig,
    table: &str,
    geom: &str,
) -> Result<()> {
    // Partial index drives the populate stage's NULL scan; the flag index
    // drives the aggregation scan; GiST serves the containment pass and
    // downstream map rendering.
    let statements = [
        format!(
            "CREATE INDEX IF NOT EXISTS {idx} ON {table} (id) WHERE raw_data IS NULL",
            idx = quote_ident(&format!("{}__null_raw_data", config.output_table))?,
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {idx} ON {table} (properties_calculated)",
            idx = quote_ident(&format!("{}__properties_calculated", config.output_table))?,
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {idx} ON {table} USING GIST ({geom})",
            idx = quote_ident(&format!("{}__geom", config.output_table))?,
        ),
    ];
    for sql in statements {
        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(GridStatsError::backend)?;
    }
    Ok(())
}
