// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Ring-and-post bollards from the street furniture dataset are listed one
//! record per post. Posts within a few metres of each other are one
//! installation, so they are dissolved into a single point with a `quantity`.

use crate::aggregation::{AggregationPolicy, Reducer};
use crate::dbscan;
use crate::error::ConflationError;
use crate::feature::{Feature, QUANTITY};
use crate::projection::{planar_centroid, planar_to_geographic, to_planar};
use tracing::debug;

pub const RING_RADIUS_M: f64 = 5.0;

pub const STREET_FURNITURE_ID: &str = "ref:open.toronto.ca:street-furniture-bicycle-parking:id";

pub fn ring_policy() -> AggregationPolicy {
    AggregationPolicy::new(
        "ring",
        &[
            ("amenity", Reducer::First),
            ("bicycle_parking", Reducer::First),
            ("capacity", Reducer::Sum),
            ("operator", Reducer::First),
            ("covered", Reducer::FrequencySummary),
            ("access", Reducer::FrequencySummary),
            ("fee", Reducer::First),
            (STREET_FURNITURE_ID, Reducer::Join(";")),
            ("meta_status", Reducer::First),
            ("meta_business_improvement_area", Reducer::FrequencySummary),
            ("meta_ward_name", Reducer::FrequencySummary),
            ("meta_ward_number", Reducer::FrequencySummary),
            ("meta_source", Reducer::First),
            ("meta_source_dataset", Reducer::First),
            ("meta_source_url", Reducer::First),
            ("meta_source_license", Reducer::First),
            ("meta_source_license_url", Reducer::First),
            ("meta_source_last_updated", Reducer::First),
            (QUANTITY, Reducer::Sum),
        ],
    )
}

/// Dissolves bollards within [`RING_RADIUS_M`] of each other. Every input
/// feature ends up in exactly one output record, so the output `quantity`
/// always sums to the input length.
pub fn group_proximate_rings(rings: &[Feature]) -> Result<Vec<Feature>, ConflationError> {
    let policy = ring_policy();

    let tagged: Vec<Feature> = rings
        .iter()
        .cloned()
        .map(|mut f| {
            f.set(QUANTITY, 1);
            f
        })
        .collect();

    policy.validate(&tagged)?;

    let planar = to_planar(&tagged.iter().map(|f| f.point).collect::<Vec<_>>());
    let labels = dbscan::cluster(&planar, RING_RADIUS_M, 1)?;
    let (groups, _) = dbscan::group_labels(&labels);

    let mut output = Vec::with_capacity(groups.len());
    for group in groups {
        if let [single] = group.as_slice() {
            output.push(tagged[*single].clone());
            continue;
        }

        let members: Vec<&Feature> = group.iter().map(|&i| &tagged[i]).collect();
        let member_points: Vec<_> = group.iter().map(|&i| planar[i]).collect();
        let centroid = planar_centroid(&member_points)
            .map(planar_to_geographic)
            .unwrap_or(members[0].point);
        output.push(policy.aggregate(&members, centroid)?);
    }

    debug!(
        "Grouped {} ring and post bollards into {} points",
        rings.len(),
        output.len()
    );

    Ok(output)
}
