// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Civic locker listings have no stable id and coarse coordinates, so they
//! are matched to OpenStreetMap lockers by distance alone.

use crate::dbscan::BOUNDARY_TOLERANCE_M;
use crate::feature::Feature;
use crate::projection::geographic_to_planar;
use crate::references::{LOCKERS, OperatorMatcher};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use tracing::debug;

pub const LOCKER_MATCH_RADIUS_M: f64 = 200.0;

fn planar_xy(feature: &Feature) -> [f64; 2] {
    let p = geographic_to_planar(feature.point);
    [p.x(), p.y()]
}

/// Keeps the civic lockers with no OSM locker of the civic operator within
/// [`LOCKER_MATCH_RADIUS_M`]. The OSM side is only read.
pub fn drop_mapped_lockers(
    lockers: &[Feature],
    crowd: &[Feature],
    authority: &OperatorMatcher,
) -> Vec<Feature> {
    let mapped: Vec<GeomWithData<[f64; 2], usize>> = crowd
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_parking_type(LOCKERS) && authority.matches(f))
        .map(|(i, f)| GeomWithData::new(planar_xy(f), i))
        .collect();

    if mapped.is_empty() {
        return lockers.to_vec();
    }

    let tree = RTree::bulk_load(mapped);
    let limit = LOCKER_MATCH_RADIUS_M + BOUNDARY_TOLERANCE_M;

    let kept: Vec<Feature> = lockers
        .iter()
        .filter(|locker| {
            let [x, y] = planar_xy(locker);
            match tree.nearest_neighbor(&[x, y]) {
                Some(nearest) => {
                    let [nx, ny] = *nearest.geom();
                    (nx - x).hypot(ny - y) > limit
                }
                None => true,
            }
        })
        .cloned()
        .collect();

    debug!(
        "Suppressed {} of {} civic lockers already mapped on OSM",
        lockers.len() - kept.len(),
        lockers.len()
    );

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::test_support::{ORIGIN_X, ORIGIN_Y, feature_at};
    use serde_json::json;

    fn civic_locker(dx: f64) -> Feature {
        feature_at(
            ORIGIN_X + dx,
            ORIGIN_Y,
            json!({"bicycle_parking": "lockers", "meta_source": "City of Toronto"}),
        )
    }

    fn osm_locker(operator: &str) -> Feature {
        feature_at(
            ORIGIN_X,
            ORIGIN_Y,
            json!({"bicycle_parking": "lockers", "operator": operator, "meta_source": "OpenStreetMap"}),
        )
    }

    fn matcher() -> OperatorMatcher {
        OperatorMatcher::new("City of Toronto").unwrap()
    }

    #[test]
    fn test_suppression_boundary() {
        let lockers = vec![civic_locker(200.0), civic_locker(201.0), civic_locker(-50.0)];
        let crowd = vec![osm_locker("City of Toronto")];
        let kept = drop_mapped_lockers(&lockers, &crowd, &matcher());
        assert_eq!(kept, vec![lockers[1].clone()]);
    }

    #[test]
    fn test_other_operators_do_not_suppress() {
        let lockers = vec![civic_locker(10.0)];
        let crowd = vec![osm_locker("Bike Share Toronto")];
        assert_eq!(drop_mapped_lockers(&lockers, &crowd, &matcher()), lockers);
    }

    #[test]
    fn test_only_lockers_suppress() {
        let lockers = vec![civic_locker(10.0)];
        let mut rack = osm_locker("City of Toronto");
        rack.set("bicycle_parking", "rack");
        assert_eq!(drop_mapped_lockers(&lockers, &[rack], &matcher()), lockers);
    }

    #[test]
    fn test_empty_sides() {
        assert!(drop_mapped_lockers(&[], &[osm_locker("City of Toronto")], &matcher()).is_empty());
        let lockers = vec![civic_locker(0.0)];
        assert_eq!(drop_mapped_lockers(&lockers, &[], &matcher()), lockers);
    }
}
