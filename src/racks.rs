// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Cross-dataset rack deduplication.
//!
//! Several civic datasets list the same racks. Racks within [`RACK_RADIUS_M`]
//! are merged, but only when the cluster spans at least two datasets: two
//! close racks from the same dataset are taken to be distinct fixtures.

use crate::aggregation::{AggregationPolicy, Reducer};
use crate::dbscan;
use crate::error::ConflationError;
use crate::feature::{CAPACITY, DESCRIPTION, Feature};
use crate::projection::{planar_centroid, planar_to_geographic, to_planar};
use ahash::AHashSet;
use tracing::debug;

pub const RACK_RADIUS_M: f64 = 30.0;

pub const MIN_DISTINCT_SOURCES: usize = 2;

/// Marks records merged from several datasets.
pub const MERGED_SOURCE_FIELD: &str = "source";
pub const MERGED_SOURCE: &str = "city-multi";

const DEBUG_LIST: Reducer = Reducer::Join(" | ");

pub fn rack_policy() -> AggregationPolicy {
    AggregationPolicy::new(
        "rack",
        &[
            (MERGED_SOURCE_FIELD, Reducer::Constant(MERGED_SOURCE)),
            ("amenity", Reducer::First),
            ("bicycle_parking", Reducer::First),
            (CAPACITY, Reducer::Min),
            ("operator", Reducer::First),
            ("covered", DEBUG_LIST),
            ("access", Reducer::First),
            ("fee", Reducer::First),
            ("start_date", DEBUG_LIST),
            ("length", DEBUG_LIST),
            (
                DESCRIPTION,
                Reducer::Narrative {
                    heading: "MULTIPLE RACKS",
                    noun: "bicycle racks",
                },
            ),
            ("seasonal", DEBUG_LIST),
            (
                "ref:open.toronto.ca:bicycle-parking-high-capacity-outdoor:id",
                DEBUG_LIST,
            ),
            ("ref:open.toronto.ca:bicycle-parking-racks:objectid", DEBUG_LIST),
            (
                "ref:open.toronto.ca:street-furniture-bicycle-parking:id",
                DEBUG_LIST,
            ),
            ("meta_borough", Reducer::First),
            ("meta_ward_name", Reducer::First),
            ("meta_ward_number", Reducer::First),
            ("meta_status", DEBUG_LIST),
            ("meta_business_improvement_area", DEBUG_LIST),
            ("meta_source", DEBUG_LIST),
            ("meta_source_dataset", DEBUG_LIST),
            ("meta_source_url", DEBUG_LIST),
            ("meta_source_license", Reducer::First),
            ("meta_source_license_url", Reducer::First),
            ("meta_source_last_updated", DEBUG_LIST),
        ],
    )
}

fn distinct_sources(members: &[usize], racks: &[Feature]) -> usize {
    members
        .iter()
        .map(|&i| racks[i].source_dataset())
        .collect::<AHashSet<_>>()
        .len()
}

/// Merges racks that several datasets place within [`RACK_RADIUS_M`] of each
/// other. Merged records come first, in cluster order, followed by every
/// rack left standing alone (never clustered, then rejected single-source
/// clusters), each in input order and untouched.
pub fn group_proximate_racks(racks: &[Feature]) -> Result<Vec<Feature>, ConflationError> {
    let policy = rack_policy();
    policy.validate(racks)?;

    let planar = to_planar(&racks.iter().map(|f| f.point).collect::<Vec<_>>());
    let labels = dbscan::cluster(&planar, RACK_RADIUS_M, MIN_DISTINCT_SOURCES)?;
    let (groups, noise) = dbscan::group_labels(&labels);

    let (accepted, rejected): (Vec<Vec<usize>>, Vec<Vec<usize>>) = groups
        .into_iter()
        .partition(|members| distinct_sources(members, racks) >= MIN_DISTINCT_SOURCES);

    let mut returned_to_singles: Vec<usize> = rejected.into_iter().flatten().collect();
    returned_to_singles.sort_unstable();

    debug!(
        "Rack clustering: {} multi-source clusters, {} single-source clusters returned to singles",
        accepted.len(),
        returned_to_singles.len()
    );

    let mut output = Vec::with_capacity(accepted.len() + noise.len() + returned_to_singles.len());
    for members in &accepted {
        let member_features: Vec<&Feature> = members.iter().map(|&i| &racks[i]).collect();
        let member_points: Vec<_> = members.iter().map(|&i| planar[i]).collect();
        let centroid = planar_centroid(&member_points)
            .map(planar_to_geographic)
            .unwrap_or(member_features[0].point);
        output.push(policy.aggregate(&member_features, centroid)?);
    }

    output.extend(
        noise
            .into_iter()
            .chain(returned_to_singles)
            .map(|i| racks[i].clone()),
    );

    Ok(output)
}
