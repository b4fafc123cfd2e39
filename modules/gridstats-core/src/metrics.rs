//! Pluggable aggregation metrics.
//!
//! An `Aggregator` is a pure function from a distance-sorted neighbor
//! slice to a flat property list. It is called in two modes:
//!
//! 1. Schema probe — `properties(&[])` returns the complete key set with
//!    neutral values, which drives storage column creation before any
//!    real data exists.
//! 2. Per-cell — the same call over a cell's actual raw data.
//!
//! Both calls must return the same keys in the same order, and the value
//! kind of each key must never change between calls.

use crate::neighbors::NeighborRecord;

// ---------------------------------------------------------------------------
// Property values and schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    Numeric,
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyKind::Text => write!(f, "text"),
            PropertyKind::Numeric => write!(f, "numeric"),
        }
    }
}

/// A computed property value. `None` persists as SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(Option<String>),
    Numeric(Option<f64>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::Numeric(_) => PropertyKind::Numeric,
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        PropertyValue::Text(Some(s.into()))
    }

    pub fn number(n: f64) -> Self {
        PropertyValue::Numeric(Some(n))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator seam
// ---------------------------------------------------------------------------

/// The pluggable statistic set computed per cell.
///
/// Implementations must be pure: no I/O, no hidden state, and `neighbors`
/// may be assumed sorted ascending by distance.
pub trait Aggregator: Send + Sync {
    /// Attribute columns to pull from the input dataset, in the order they
    /// appear in each `NeighborRecord::attrs`.
    fn input_columns(&self) -> &[&'static str];

    /// Compute the full property list for one cell.
    fn properties(&self, neighbors: &[NeighborRecord]) -> Vec<Property>;
}

/// Derive the storage schema by probing the aggregator with no data.
pub fn probe_schema(aggregator: &dyn Aggregator) -> Vec<(String, PropertyKind)> {
    aggregator
        .properties(&[])
        .into_iter()
        .map(|p| (p.name, p.value.kind()))
        .collect()
}

// ---------------------------------------------------------------------------
// ReligionMetrics — the reference metric set
// ---------------------------------------------------------------------------

/// Religion/denomination statistics over OSM place-of-worship points.
///
/// Expects `attrs = [religion, denomination]` per neighbor record.
pub struct ReligionMetrics;

/// Religions that get a dedicated inverse-distance score column.
const SCORED_RELIGIONS: [&str; 6] = [
    "christian", "muslim", "hindu", "buddhist", "shinto", "jewish",
];

/// Fixed radii (meters) for the windowed most-common metrics.
const RADII: [(&str, f64); 3] = [("50km", 50_000.0), ("10km", 10_000.0), ("5km", 5_000.0)];

impl ReligionMetrics {
    fn religion(record: &NeighborRecord) -> &str {
        record.attrs.first().map(String::as_str).unwrap_or("")
    }

    fn denomination(record: &NeighborRecord) -> &str {
        record.attrs.get(1).map(String::as_str).unwrap_or("")
    }

    /// Majority religion, then majority denomination among that religion's
    /// records. Ties go to the first-encountered value.
    fn most_common(records: &[&NeighborRecord]) -> (String, String) {
        let religion = mode(records.iter().map(|r| Self::religion(r)));
        let denomination = mode(
            records
                .iter()
                .filter(|r| Self::religion(r) == religion)
                .map(|r| Self::denomination(r)),
        );
        (religion, denomination)
    }
}

/// Most frequent item, ties broken by first-encountered order.
fn mode<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(name, _)| *name == item) {
            Some((_, n)) => *n += 1,
            None => counts.push((item, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((name, count));
        }
    }
    best.map(|(name, _)| name.to_string()).unwrap_or_default()
}

impl Aggregator for ReligionMetrics {
    fn input_columns(&self) -> &[&'static str] {
        &["religion", "denomination"]
    }

    fn properties(&self, neighbors: &[NeighborRecord]) -> Vec<Property> {
        let mut props: Vec<Property> = Vec::with_capacity(22);
        let mut set = |name: &str, value: PropertyValue| {
            match props.iter_mut().find(|p| p.name == name) {
                Some(p) => p.value = value,
                None => props.push(Property::new(name, value)),
            }
        };

        // Probe defaults: full key set, neutral values, fixed kinds.
        set("closest_religion", PropertyValue::text(""));
        set("closest_denomination", PropertyValue::text(""));
        set("most_common_religion", PropertyValue::text(""));
        set("most_common_denomination", PropertyValue::text(""));
        set("most_common_10_religion", PropertyValue::text(""));
        set("most_common_10_denomination", PropertyValue::text(""));
        for (label, _) in RADII {
            set(
                &format!("most_common_religion_wi_{label}"),
                PropertyValue::text(""),
            );
            set(
                &format!("most_common_denomination_wi_{label}"),
                PropertyValue::text(""),
            );
        }
        set("weighted_most_common_religion", PropertyValue::text(""));
        set("weighted_most_common_denomination", PropertyValue::text(""));
        for religion in SCORED_RELIGIONS {
            set(&format!("{religion}_score"), PropertyValue::number(0.0));
        }
        set("closest_pow", PropertyValue::number(0.0));
        set("closest_3_pow", PropertyValue::number(0.0));

        if neighbors.is_empty() {
            return props;
        }

        set(
            "closest_religion",
            PropertyValue::text(Self::religion(&neighbors[0])),
        );
        set(
            "closest_denomination",
            PropertyValue::text(Self::denomination(&neighbors[0])),
        );

        // Distance to the nearest and 3rd-nearest place of worship; a
        // rough accuracy indicator for the cell. Fewer than 3 neighbors
        // means no 3rd distance, stored as NULL.
        set("closest_pow", PropertyValue::number(neighbors[0].distance_m));
        set(
            "closest_3_pow",
            PropertyValue::Numeric(neighbors.get(2).map(|r| r.distance_m)),
        );

        let all: Vec<&NeighborRecord> = neighbors.iter().collect();
        let (religion, denomination) = Self::most_common(&all);
        set("most_common_religion", PropertyValue::text(religion));
        set("most_common_denomination", PropertyValue::text(denomination));

        let nearest_10: Vec<&NeighborRecord> = neighbors.iter().take(10).collect();
        let (religion, denomination) = Self::most_common(&nearest_10);
        set("most_common_10_religion", PropertyValue::text(religion));
        set("most_common_10_denomination", PropertyValue::text(denomination));

        for (label, radius_m) in RADII {
            let within: Vec<&NeighborRecord> = neighbors
                .iter()
                .filter(|r| r.distance_m <= radius_m)
                .collect();
            if within.is_empty() {
                continue;
            }
            let (religion, denomination) = Self::most_common(&within);
            set(
                &format!("most_common_religion_wi_{label}"),
                PropertyValue::text(religion),
            );
            set(
                &format!("most_common_denomination_wi_{label}"),
                PropertyValue::text(denomination),
            );
        }

        // Inverse-distance weight per religion, first-encounter order.
        let mut weights: Vec<(&str, f64)> = Vec::new();
        for record in neighbors {
            let religion = Self::religion(record);
            let weight = 1.0 / record.distance_m;
            match weights.iter_mut().find(|(name, _)| *name == religion) {
                Some((_, w)) => *w += weight,
                None => weights.push((religion, weight)),
            }
        }

        for religion in SCORED_RELIGIONS {
            let score = weights
                .iter()
                .find(|(name, _)| *name == religion)
                .map(|(_, w)| *w)
                .unwrap_or(0.0);
            set(&format!("{religion}_score"), PropertyValue::number(score));
        }

        // Historical behavior: picks the religion with the LOWEST weighted
        // score. Almost certainly inverted relative to intent, kept until a
        // product decision flips it. min_by returns the first of equal
        // minima, matching the first-encounter tie-break elsewhere.
        if let Some((religion, _)) = weights
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            set(
                "weighted_most_common_religion",
                PropertyValue::text(*religion),
            );
        }

        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(distance_m: f64, religion: &str, denomination: &str) -> NeighborRecord {
        NeighborRecord::new(distance_m, vec![religion.to_string(), denomination.to_string()])
    }

    fn get<'a>(props: &'a [Property], name: &str) -> &'a PropertyValue {
        &props
            .iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("missing property {name}"))
            .value
    }

    fn sample() -> Vec<NeighborRecord> {
        vec![
            rec(1000.0, "christian", "catholic"),
            rec(2000.0, "christian", "orthodox"),
            rec(3000.0, "muslim", "sunni"),
        ]
    }

    #[test]
    fn probe_is_pure_and_returns_the_full_key_set() {
        let first = ReligionMetrics.properties(&[]);
        let second = ReligionMetrics.properties(&[]);
        assert_eq!(first, second);
        assert_eq!(first.len(), 22);

        let names: Vec<&str> = first.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"closest_religion"));
        assert!(names.contains(&"most_common_denomination_wi_5km"));
        assert!(names.contains(&"shinto_score"));
        assert_eq!(*get(&first, "christian_score"), PropertyValue::number(0.0));
        assert_eq!(*get(&first, "closest_religion"), PropertyValue::text(""));
    }

    #[test]
    fn probe_schema_kinds_are_stable_against_real_data() {
        let probed = probe_schema(&ReligionMetrics);
        let computed = ReligionMetrics.properties(&sample());
        assert_eq!(probed.len(), computed.len());
        for ((name, kind), prop) in probed.iter().zip(&computed) {
            assert_eq!(name, &prop.name);
            assert_eq!(*kind, prop.value.kind());
        }
    }

    #[test]
    fn closest_and_most_common_from_the_reference_example() {
        let props = ReligionMetrics.properties(&sample());
        assert_eq!(*get(&props, "closest_religion"), PropertyValue::text("christian"));
        assert_eq!(
            *get(&props, "closest_denomination"),
            PropertyValue::text("catholic")
        );
        assert_eq!(
            *get(&props, "most_common_religion"),
            PropertyValue::text("christian")
        );
        // Denomination majority is taken within the winning religion only.
        assert_eq!(
            *get(&props, "most_common_denomination"),
            PropertyValue::text("catholic")
        );
        // All three records are within 5km, so the windowed metric matches.
        assert_eq!(
            *get(&props, "most_common_religion_wi_5km"),
            PropertyValue::text("christian")
        );
    }

    #[test]
    fn distance_markers() {
        let props = ReligionMetrics.properties(&sample());
        assert_eq!(*get(&props, "closest_pow"), PropertyValue::number(1000.0));
        assert_eq!(*get(&props, "closest_3_pow"), PropertyValue::number(3000.0));
    }

    #[test]
    fn third_closest_is_null_with_fewer_than_three_neighbors() {
        let props = ReligionMetrics.properties(&[rec(800.0, "muslim", "sunni")]);
        assert_eq!(*get(&props, "closest_3_pow"), PropertyValue::Numeric(None));
        assert_eq!(*get(&props, "closest_pow"), PropertyValue::number(800.0));
    }

    #[test]
    fn windowed_metrics_stay_unset_when_the_radius_is_empty() {
        let props = ReligionMetrics.properties(&[rec(20_000.0, "hindu", "")]);
        assert_eq!(
            *get(&props, "most_common_religion_wi_5km"),
            PropertyValue::text("")
        );
        assert_eq!(
            *get(&props, "most_common_religion_wi_50km"),
            PropertyValue::text("hindu")
        );
    }

    #[test]
    fn nearest_10_window_ignores_later_records() {
        let mut records: Vec<NeighborRecord> = (0..10)
            .map(|i| rec(100.0 + i as f64, "christian", "catholic"))
            .collect();
        records.extend((0..20).map(|i| rec(5000.0 + i as f64, "muslim", "sunni")));
        let props = ReligionMetrics.properties(&records);
        assert_eq!(
            *get(&props, "most_common_10_religion"),
            PropertyValue::text("christian")
        );
        assert_eq!(
            *get(&props, "most_common_religion"),
            PropertyValue::text("muslim")
        );
    }

    #[test]
    fn inverse_distance_scores_and_absent_categories() {
        let props = ReligionMetrics.properties(&sample());
        let expected = 1.0 / 1000.0 + 1.0 / 2000.0;
        match get(&props, "christian_score") {
            PropertyValue::Numeric(Some(score)) => assert!((score - expected).abs() < 1e-12),
            other => panic!("unexpected value {other:?}"),
        }
        // No jewish neighbors: score is 0, not NULL.
        assert_eq!(*get(&props, "jewish_score"), PropertyValue::number(0.0));
    }

    #[test]
    fn weighted_most_common_selects_the_minimum_score() {
        // christian weight 1/1000 + 1/2000, muslim weight 1/3000 — muslim
        // has the lower score and wins under the documented behavior.
        let props = ReligionMetrics.properties(&sample());
        assert_eq!(
            *get(&props, "weighted_most_common_religion"),
            PropertyValue::text("muslim")
        );
    }

    #[test]
    fn mode_ties_go_to_the_first_encountered_value() {
        let records = vec![
            rec(1.0, "shinto", "a"),
            rec(2.0, "buddhist", "b"),
            rec(3.0, "buddhist", "b"),
            rec(4.0, "shinto", "a"),
        ];
        let props = ReligionMetrics.properties(&records);
        assert_eq!(
            *get(&props, "most_common_religion"),
            PropertyValue::text("shinto")
        );
    }
}
