//! PostGIS-backed implementations of the pipeline traits.
//!
//! Postgres cannot bind identifiers, so table and column names go through
//! `quote_ident` validation and everything else is a `$n` bind. That split
//! is the safety boundary: no value ever reaches the SQL text.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use gridstats_core::{
    CellSpec, GridStatsError, NeighborRecord, PipelineConfig, Property, PropertyValue, Result,
};

use crate::traits::{CellStore, LandMask, PointSource, UncalculatedCell, UnpopulatedCell};

/// Validate and double-quote a SQL identifier. Rejects anything that is
/// not `[A-Za-z_][A-Za-z0-9_]*` — identifiers come from configuration and
/// from aggregator property names, never from data.
pub fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !head_ok || !tail_ok {
        return Err(GridStatsError::Config(format!(
            "invalid SQL identifier '{name}'"
        )));
    }
    Ok(format!("\"{name}\""))
}

// ---------------------------------------------------------------------------
// PgCellStore
// ---------------------------------------------------------------------------

/// The output table: one row per surviving cell.
#[derive(Clone)]
pub struct PgCellStore {
    pool: PgPool,
    /// Raw names, for catalog introspection binds.
    table_name: String,
    geom_name: String,
    /// Quoted names, for SQL text.
    table: String,
    geom: String,
    land_table: String,
    land_geom: String,
    srid: i32,
}

impl PgCellStore {
    pub fn new(pool: PgPool, config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            pool,
            table_name: config.output_table.clone(),
            geom_name: config.output_geom_col.clone(),
            table: quote_ident(&config.output_table)?,
            geom: quote_ident(&config.output_geom_col)?,
            land_table: quote_ident(&config.land.table)?,
            land_geom: quote_ident(&config.land.geom_col)?,
            srid: config.srid,
        })
    }
}

#[async_trait]
impl CellStore for PgCellStore {
    async fn has_rows(&self) -> Result<bool> {
        let row = sqlx::query(&format!("SELECT 1 FROM {} LIMIT 1", self.table))
            .fetch_optional(&self.pool)
            .await
            .map_err(GridStatsError::backend)?;
        Ok(row.is_some())
    }

    async fn insert_envelope(&self, cell: &CellSpec) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES (ST_Multi(ST_GeomFromText($1, $2)))",
            self.table, self.geom
        ))
        .bind(cell.envelope_wkt())
        .bind(self.srid)
        .execute(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(())
    }

    async fn insert_clipped(&self, ewkt: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES (ST_GeomFromEWKT($1))",
            self.table, self.geom
        ))
        .bind(ewkt)
        .execute(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(())
    }

    async fn insert_point_batch(&self, points: &[(f64, f64)]) -> Result<()> {
        let lons: Vec<f64> = points.iter().map(|(lon, _)| *lon).collect();
        let lats: Vec<f64> = points.iter().map(|(_, lat)| *lat).collect();
        sqlx::query(&format!(
            r#"
            INSERT INTO {} ({})
            SELECT ST_SetSRID(ST_MakePoint(lon, lat), $3)
            FROM UNNEST($1::float8[], $2::float8[]) AS pts(lon, lat)
            "#,
            self.table, self.geom
        ))
        .bind(&lons)
        .bind(&lats)
        .bind(self.srid)
        .execute(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(())
    }

    async fn delete_points_outside_land(&self) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"
            DELETE FROM {t}
            WHERE NOT EXISTS (
                SELECT 1 FROM {lt} l
                WHERE l.{lg} && {t}.{g} AND ST_Contains(l.{lg}, {t}.{g})
            )
            "#,
            t = self.table,
            g = self.geom,
            lt = self.land_table,
            lg = self.land_geom,
        ))
        .execute(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(result.rows_affected())
    }

    async fn unpopulated_cells(&self, after_id: i64, limit: i64) -> Result<Vec<UnpopulatedCell>> {
        // Representative point computed server-side from the stored
        // geometry: works for both point and polygon cells.
        let rows = sqlx::query_as::<_, (i64, f64, f64)>(&format!(
            r#"
            SELECT id,
                   (ST_XMax({g}) + ST_XMin({g})) / 2 AS lon,
                   (ST_YMax({g}) + ST_YMin({g})) / 2 AS lat
            FROM {t}
            WHERE raw_data IS NULL AND NOT ST_IsEmpty({g}) AND id > $1
            ORDER BY id
            LIMIT $2
            "#,
            t = self.table,
            g = self.geom,
        ))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;

        Ok(rows
            .into_iter()
            .map(|(id, lon, lat)| UnpopulatedCell { id, lon, lat })
            .collect())
    }

    async fn store_raw_data(&self, id: i64, raw_data: &serde_json::Value) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET raw_data = $1 WHERE id = $2",
            self.table
        ))
        .bind(raw_data)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(())
    }

    async fn uncalculated_cells(&self, after_id: i64, limit: i64) -> Result<Vec<UncalculatedCell>> {
        let rows = sqlx::query_as::<_, (i64, serde_json::Value)>(&format!(
            r#"
            SELECT id, raw_data
            FROM {}
            WHERE properties_calculated IS FALSE AND raw_data IS NOT NULL AND id > $1
            ORDER BY id
            LIMIT $2
            "#,
            self.table
        ))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;

        Ok(rows
            .into_iter()
            .map(|(id, raw_data)| UncalculatedCell { id, raw_data })
            .collect())
    }

    async fn store_properties(&self, id: i64, properties: &[Property]) -> Result<()> {
        let mut sets = vec!["properties_calculated = TRUE".to_string()];
        for (i, prop) in properties.iter().enumerate() {
            sets.push(format!("{} = ${}", quote_ident(&prop.name)?, i + 1));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ${}",
            self.table,
            sets.join(", "),
            properties.len() + 1
        );

        let mut query = sqlx::query(&sql);
        for prop in properties {
            query = match &prop.value {
                PropertyValue::Text(v) => query.bind(v.clone()),
                PropertyValue::Numeric(v) => query.bind(*v),
            };
        }
        query
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(GridStatsError::backend)?;
        Ok(())
    }

    async fn reset_calculated_flags(&self) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET properties_calculated = FALSE WHERE properties_calculated IS TRUE",
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(result.rows_affected())
    }

    async fn geometry_type(&self) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT type FROM geometry_columns
            WHERE f_table_name = $1 AND f_geometry_column = $2
            "#,
        )
        .bind(&self.table_name)
        .bind(&self.geom_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(row.map(|(t,)| t))
    }

    async fn points_to_polygons(&self, increment: f64) -> Result<()> {
        // ALTER cannot take binds; the expansion radius comes from the
        // validated numeric config, not from data.
        let half = increment / 2.0;
        sqlx::query(&format!(
            r#"
            ALTER TABLE {t}
            ALTER COLUMN {g} TYPE geometry(MultiPolygon, {srid})
            USING ST_Multi(ST_Envelope(ST_Expand({g}, {half})))
            "#,
            t = self.table,
            g = self.geom,
            srid = self.srid,
            half = half,
        ))
        .execute(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PgLandMask
// ---------------------------------------------------------------------------

/// Read-only land boundary table. Never written by the pipeline.
#[derive(Clone)]
pub struct PgLandMask {
    pool: PgPool,
    land_table: String,
    land_geom: String,
    srid: i32,
}

impl PgLandMask {
    pub fn new(pool: PgPool, config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            pool,
            land_table: quote_ident(&config.land.table)?,
            land_geom: quote_ident(&config.land.geom_col)?,
            srid: config.srid,
        })
    }
}

#[async_trait]
impl LandMask for PgLandMask {
    async fn clip_envelope(&self, cell: &CellSpec) -> Result<Option<String>> {
        // Within / contains / intersects cascade; ST_CollectionExtract(_, 3)
        // keeps only the areal part, discarding line and point slivers.
        // The outer filter drops empty unions so sea cells are never
        // materialized.
        let rows = sqlx::query_as::<_, (String,)>(&format!(
            r#"
            SELECT ST_AsEWKT(s.g)
            FROM (
                SELECT ST_Multi(ST_Union(
                    CASE
                        WHEN ST_Within(env.e, l.{lg}) THEN env.e
                        WHEN ST_Within(l.{lg}, env.e) THEN ST_Multi(l.{lg})
                        WHEN ST_Intersects(l.{lg}, env.e)
                            THEN ST_CollectionExtract(ST_Multi(ST_Intersection(l.{lg}, env.e)), 3)
                        ELSE NULL
                    END
                )) AS g
                FROM {lt} l, (SELECT ST_GeomFromText($1, $2) AS e) env
                WHERE l.{lg} && env.e
            ) s
            WHERE s.g IS NOT NULL AND NOT ST_IsEmpty(s.g)
            "#,
            lt = self.land_table,
            lg = self.land_geom,
        ))
        .bind(cell.envelope_wkt())
        .bind(self.srid)
        .fetch_all(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;

        if rows.len() > 1 {
            return Err(GridStatsError::DataAnomaly(format!(
                "clip aggregate returned {} rows for one cell",
                rows.len()
            )));
        }
        Ok(rows.into_iter().next().map(|(ewkt,)| ewkt))
    }

    async fn overlaps(&self, cell: &CellSpec) -> Result<bool> {
        let row = sqlx::query(&format!(
            "SELECT 1 FROM {lt} l WHERE l.{lg} && ST_GeomFromText($1, $2) LIMIT 1",
            lt = self.land_table,
            lg = self.land_geom,
        ))
        .bind(cell.envelope_wkt())
        .bind(self.srid)
        .fetch_optional(&self.pool)
        .await
        .map_err(GridStatsError::backend)?;
        Ok(row.is_some())
    }
}

// ---------------------------------------------------------------------------
// PgPointSource
// ---------------------------------------------------------------------------

/// The input point dataset, queried with the KNN index operator.
#[derive(Clone)]
pub struct PgPointSource {
    pool: PgPool,
    table: String,
    geom: String,
    /// Quoted attribute columns, in `NeighborRecord::attrs` order.
    columns: Vec<String>,
    srid: i32,
}

impl PgPointSource {
    pub fn new(pool: PgPool, config: &PipelineConfig, input_columns: &[&str]) -> Result<Self> {
        Ok(Self {
            pool,
            table: quote_ident(&config.input_table)?,
            geom: quote_ident(&config.input_geom_col)?,
            columns: input_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?,
            srid: config.srid,
        })
    }
}

#[async_trait]
impl PointSource for PgPointSource {
    async fn nearest(&self, lon: f64, lat: f64, k: usize) -> Result<Vec<NeighborRecord>> {
        // `<->` walks the spatial index in approximate distance order; the
        // populate stage re-sorts by the true ST_DistanceSphere value.
        let cols = self
            .columns
            .iter()
            .map(|c| format!("t.{c}::text"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT ST_DistanceSphere(ST_SetSRID(ST_MakePoint($1, $2), $3), t.{g}) AS dist,
                   {cols}
            FROM {t} t
            ORDER BY t.{g} <-> ST_SetSRID(ST_MakePoint($1, $2), $3)
            LIMIT $4
            "#,
            t = self.table,
            g = self.geom,
        );

        let rows = sqlx::query(&sql)
            .bind(lon)
            .bind(lat)
            .bind(self.srid)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(GridStatsError::backend)?;

        rows.into_iter()
            .map(|row| {
                let distance_m: f64 = row.try_get(0).map_err(GridStatsError::backend)?;
                let attrs = (1..=self.columns.len())
                    .map(|i| {
                        row.try_get::<Option<String>, _>(i)
                            .map(Option::unwrap_or_default)
                            .map_err(GridStatsError::backend)
                    })
                    .collect::<Result<Vec<String>>>()?;
                Ok(NeighborRecord { distance_m, attrs })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_accepts_plain_identifiers() {
        assert_eq!(quote_ident("religion_points").unwrap(), "\"religion_points\"");
        assert_eq!(quote_ident("_geom2").unwrap(), "\"_geom2\"");
    }

    #[test]
    fn quote_ident_rejects_injection_shapes() {
        assert!(quote_ident("").is_err());
        assert!(quote_ident("1table").is_err());
        assert!(quote_ident("t; DROP TABLE x").is_err());
        assert!(quote_ident("geo\"m").is_err());
        assert!(quote_ident("geo m").is_err());
    }
}
