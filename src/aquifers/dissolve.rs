//! Grouping and geometric union of aquifer records.

use geo::{BooleanOps, MultiPolygon};
use std::collections::BTreeMap;

use crate::model::{AquiferRecord, DissolvedAquifer};

struct Group {
    representative_aquifer: String,
    geometries: Vec<MultiPolygon<f64>>,
}

/// Merges records sharing a `broader` value into one row per group.
///
/// Groups come out in byte-wise order of the group name and are numbered
/// `0..k` in that order. Each group keeps the aquifer name of its first
/// record, so callers sort records beforehand for a deterministic choice.
pub fn dissolve(records: Vec<AquiferRecord>) -> Vec<DissolvedAquifer> {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.broader)
            .or_insert_with(|| Group {
                representative_aquifer: record.aquifer,
                geometries: Vec::new(),
            })
            .geometries
            .push(record.geometry);
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(index, (name, group))| DissolvedAquifer {
            id: index as i64,
            name,
            representative_aquifer: group.representative_aquifer,
            source_records: group.geometries.len(),
            geometry: union_all(group.geometries),
        })
        .collect()
}

/// Union of every geometry, reduced pairwise to keep intermediate shapes small.
pub fn union_all(mut geometries: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    if geometries.is_empty() {
        return MultiPolygon(Vec::new());
    }
    if geometries.len() == 1 {
        let only = geometries.remove(0);
        return only.union(&MultiPolygon(Vec::new()));
    }
    while geometries.len() > 1 {
        let mut next = Vec::with_capacity(geometries.len().div_ceil(2));
        let mut iter = geometries.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => next.push(a.union(&b)),
                None => next.push(a),
            }
        }
        geometries = next;
    }
    geometries.remove(0)
}
