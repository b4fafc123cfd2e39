//! Stage: compute derived properties for every populated cell.
//!
//! Touches only rows with non-NULL `raw_data` and
//! `properties_calculated = FALSE`; the flag flips to TRUE in the same
//! statement that writes the values, so a row is either fully computed or
//! untouched. A global recalculation resets every flag first, then the
//! incremental scan takes over as usual.

use std::collections::HashMap;

use tracing::info;

use gridstats_core::{
    from_raw_json, probe_schema, Aggregator, GridStatsError, Property, PropertyKind, Result,
};

use crate::traits::CellStore;

const FETCH_BATCH: i64 = 1_000;

#[derive(Debug, Default, PartialEq)]
pub struct AggregateStats {
    pub calculated: usize,
    /// Rows whose flag was cleared by a recalculate-all request.
    pub reset: u64,
}

pub async fn calculate_properties(
    store: &dyn CellStore,
    aggregator: &dyn Aggregator,
    recalculate_all: bool,
) -> Result<AggregateStats> {
    let probed = probe_schema(aggregator);
    let mut stats = AggregateStats::default();

    if recalculate_all {
        stats.reset = store.reset_calculated_flags().await?;
        info!(reset = stats.reset, "cleared properties_calculated for full recompute");
    }

    let mut after_id = 0i64;
    loop {
        let cells = store.uncalculated_cells(after_id, FETCH_BATCH).await?;
        let Some(last) = cells.last() else {
            break;
        };
        after_id = last.id;

        for cell in &cells {
            let neighbors = from_raw_json(&cell.raw_data)?;
            let properties = aggregator.properties(&neighbors);
            check_against_probe(&probed, &properties)?;
            store.store_properties(cell.id, &properties).await?;
            stats.calculated += 1;
        }

        info!(calculated = stats.calculated, "property calculation progress");
    }

    info!(calculated = stats.calculated, "property calculation complete");
    Ok(stats)
}

/// A computed property whose kind disagrees with the probe is a defect in
/// the aggregation function, not a recoverable runtime condition.
fn check_against_probe(
    probed: &[(String, PropertyKind)],
    computed: &[Property],
) -> Result<()> {
    let kinds: HashMap<&str, PropertyKind> = probed
        .iter()
        .map(|(name, kind)| (name.as_str(), *kind))
        .collect();

    if computed.len() != probed.len() {
        return Err(GridStatsError::DataAnomaly(format!(
            "aggregator returned {} properties, schema probe declared {}",
            computed.len(),
            probed.len()
        )));
    }

    for prop in computed {
        match kinds.get(prop.name.as_str()) {
            None => {
                return Err(GridStatsError::SchemaConflict {
                    name: prop.name.clone(),
                    probed: "absent".into(),
                    computed: prop.value.kind().to_string(),
                })
            }
            Some(kind) if *kind != prop.value.kind() => {
                return Err(GridStatsError::SchemaConflict {
                    name: prop.name.clone(),
                    probed: kind.to_string(),
                    computed: prop.value.kind().to_string(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}
