// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Areas whose racks are kept out of cross-source grouping. Campus racks sit
//! close together but are separate installations, so merging them loses real
//! capacity.

use crate::feature::Feature;
use crate::projection::{PlanarPoint, geographic_to_planar};
use geo::{Closest, ClosestPoint, Contains, Coord, MapCoords, MultiPolygon, Point};

/// Racks this close to a zone's outline still count as inside it.
pub const EXEMPTION_BUFFER_M: f64 = 20.0;

#[derive(Clone, Debug)]
pub struct ExemptZone {
    pub name: String,
    planar: MultiPolygon<f64>,
}

impl ExemptZone {
    /// `area` is in WGS84 longitude/latitude.
    pub fn new(name: impl Into<String>, area: &MultiPolygon<f64>) -> Self {
        let planar = area.map_coords(|c| {
            let p = geographic_to_planar(Point::from(c));
            Coord { x: p.x(), y: p.y() }
        });
        Self {
            name: name.into(),
            planar,
        }
    }

    fn covers_planar(&self, p: PlanarPoint) -> bool {
        if self.planar.contains(&p) {
            return true;
        }
        match self.planar.closest_point(&p) {
            Closest::Intersection(_) => true,
            Closest::SinglePoint(edge) => {
                (edge.x() - p.x()).hypot(edge.y() - p.y()) <= EXEMPTION_BUFFER_M
            }
            Closest::Indeterminate => false,
        }
    }

    pub fn covers(&self, feature: &Feature) -> bool {
        self.covers_planar(geographic_to_planar(feature.point))
    }
}

/// Splits `features` into those covered by any zone and the rest, keeping
/// input order on both sides.
pub fn partition_exempt(
    features: Vec<Feature>,
    zones: &[ExemptZone],
) -> (Vec<Feature>, Vec<Feature>) {
    if zones.is_empty() {
        return (Vec::new(), features);
    }
    features
        .into_iter()
        .partition(|f| zones.iter().any(|zone| zone.covers(f)))
}
