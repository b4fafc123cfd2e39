//! Per-cell raw data: the ordered nearest-neighbor record set.
//!
//! The KNN backend orders by index distance (`<->`), which is a
//! performance hint, not a guarantee — records are re-sorted here by true
//! distance before storage. The sort is stable, so equal distances keep
//! their retrieval order and repeated runs converge to the same payload.

use serde::{Deserialize, Serialize};

use crate::error::{GridStatsError, Result};

/// One nearest-neighbor row: great-circle distance in meters plus the
/// configured attribute columns, in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborRecord {
    pub distance_m: f64,
    pub attrs: Vec<String>,
}

impl NeighborRecord {
    pub fn new(distance_m: f64, attrs: Vec<String>) -> Self {
        Self { distance_m, attrs }
    }
}

/// Sort ascending by distance. Stable: ties keep retrieval order.
pub fn sort_neighbors(records: &mut [NeighborRecord]) {
    records.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Serialize to the stored JSONB shape: `[[distance, attr, ...], ...]`.
/// An empty slice serializes to `[]` — "populated, zero neighbors".
pub fn to_raw_json(records: &[NeighborRecord]) -> serde_json::Value {
    serde_json::Value::Array(
        records
            .iter()
            .map(|r| {
                let mut row = Vec::with_capacity(1 + r.attrs.len());
                row.push(serde_json::json!(r.distance_m));
                row.extend(r.attrs.iter().map(|a| serde_json::json!(a)));
                serde_json::Value::Array(row)
            })
            .collect(),
    )
}

/// Parse a stored JSONB payload back into records.
pub fn from_raw_json(value: &serde_json::Value) -> Result<Vec<NeighborRecord>> {
    let rows = value.as_array().ok_or_else(|| {
        GridStatsError::DataAnomaly(format!("raw_data is not a JSON array: {value}"))
    })?;

    rows.iter()
        .map(|row| {
            let items = row.as_array().ok_or_else(|| {
                GridStatsError::DataAnomaly(format!("raw_data row is not an array: {row}"))
            })?;
            let distance_m = items
                .first()
                .and_then(|v| v.as_f64())
                .ok_or_else(|| {
                    GridStatsError::DataAnomaly(format!(
                        "raw_data row has no numeric distance: {row}"
                    ))
                })?;
            let attrs = items[1..]
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            Ok(NeighborRecord { distance_m, attrs })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(d: f64, religion: &str) -> NeighborRecord {
        NeighborRecord::new(d, vec![religion.to_string()])
    }

    #[test]
    fn sort_is_ascending_by_distance() {
        let mut records = vec![rec(3000.0, "a"), rec(1000.0, "b"), rec(2000.0, "c")];
        sort_neighbors(&mut records);
        let dists: Vec<f64> = records.iter().map(|r| r.distance_m).collect();
        assert_eq!(dists, vec![1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn equal_distances_keep_retrieval_order() {
        let mut records = vec![rec(500.0, "first"), rec(500.0, "second"), rec(100.0, "x")];
        sort_neighbors(&mut records);
        assert_eq!(records[0].attrs[0], "x");
        assert_eq!(records[1].attrs[0], "first");
        assert_eq!(records[2].attrs[0], "second");
    }

    #[test]
    fn raw_json_round_trip() {
        let records = vec![
            NeighborRecord::new(1000.0, vec!["christian".into(), "catholic".into()]),
            NeighborRecord::new(2000.0, vec!["muslim".into(), "sunni".into()]),
        ];
        let json = to_raw_json(&records);
        assert_eq!(from_raw_json(&json).unwrap(), records);
    }

    #[test]
    fn empty_payload_is_an_empty_array() {
        let json = to_raw_json(&[]);
        assert_eq!(json, serde_json::json!([]));
        assert!(from_raw_json(&json).unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_a_data_anomaly() {
        let bad = serde_json::json!({"not": "an array"});
        assert!(from_raw_json(&bad).is_err());
        let bad_row = serde_json::json!([["not-a-number", "x"]]);
        assert!(from_raw_json(&bad_row).is_err());
    }
}
