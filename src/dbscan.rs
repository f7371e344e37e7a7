// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Density based clustering (DBSCAN) over planar points.

use crate::error::ConflationError;
use crate::projection::PlanarPoint;
use ordered_float::OrderedFloat;
use rstar::RTree;
use rstar::primitives::GeomWithData;

/// Slack added to the search radius so that points placed exactly on the
/// boundary survive projection round-off.
pub const BOUNDARY_TOLERANCE_M: f64 = 1e-6;

/// Cluster label per input point; `None` means the point is noise.
pub type Labels = Vec<Option<usize>>;

pub fn validate_parameters(radius: f64, min_members: usize) -> Result<(), ConflationError> {
    if !radius.is_finite() || radius < 0.0 || min_members == 0 {
        return Err(ConflationError::InvalidClusterParameters {
            radius,
            min_members,
        });
    }
    Ok(())
}

/// Groups points that are density-reachable within `radius` metres.
///
/// A point is a core point when at least `min_members` points, itself
/// included, lie within `radius`. Core points chained through each other
/// share a label. A non-core point within reach of a core point takes the
/// label of its nearest core neighbour; ties go to the lower planar
/// coordinate, so reordering the input can only rename labels, never regroup.
///
/// Labels are numbered in order of each cluster's first member in the input.
pub fn cluster(
    points: &[PlanarPoint],
    radius: f64,
    min_members: usize,
) -> Result<Labels, ConflationError> {
    validate_parameters(radius, min_members)?;

    if points.is_empty() {
        return Ok(Vec::new());
    }

    let tree = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.x(), p.y()], i))
            .collect::<Vec<_>>(),
    );

    let reach = radius + BOUNDARY_TOLERANCE_M;
    let neighbours: Vec<Vec<usize>> = points
        .iter()
        .map(|p| {
            let mut found: Vec<usize> = tree
                .locate_within_distance([p.x(), p.y()], reach * reach)
                .map(|item| item.data)
                .collect();
            found.sort_unstable();
            found
        })
        .collect();

    let is_core: Vec<bool> = neighbours.iter().map(|n| n.len() >= min_members).collect();

    // expand core components
    let mut component: Vec<Option<usize>> = vec![None; points.len()];
    let mut next_component = 0;
    for start in 0..points.len() {
        if !is_core[start] || component[start].is_some() {
            continue;
        }

        component[start] = Some(next_component);
        let mut queue = vec![start];
        while let Some(current) = queue.pop() {
            for &candidate in &neighbours[current] {
                if is_core[candidate] && component[candidate].is_none() {
                    component[candidate] = Some(next_component);
                    queue.push(candidate);
                }
            }
        }
        next_component += 1;
    }

    // attach border points to their nearest core neighbour
    for i in 0..points.len() {
        if is_core[i] {
            continue;
        }
        let p = points[i];
        let nearest_core = neighbours[i]
            .iter()
            .copied()
            .filter(|&j| is_core[j])
            .min_by_key(|&j| {
                let q = points[j];
                let d2 = (q.x() - p.x()).powi(2) + (q.y() - p.y()).powi(2);
                (OrderedFloat(d2), OrderedFloat(q.x()), OrderedFloat(q.y()))
            });
        component[i] = nearest_core.and_then(|j| component[j]);
    }

    Ok(relabel_by_first_appearance(&component))
}

/// Renumbers labels so cluster ids follow the input position of each
/// cluster's first member.
fn relabel_by_first_appearance(raw: &[Option<usize>]) -> Labels {
    let mut mapping: ahash::AHashMap<usize, usize> = ahash::AHashMap::new();
    raw.iter()
        .map(|label| {
            label.map(|l| {
                let next = mapping.len();
                *mapping.entry(l).or_insert(next)
            })
        })
        .collect()
}

/// Member indices per cluster label, each in input order, plus the indices
/// of the noise points.
pub fn group_labels(labels: &[Option<usize>]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let cluster_count = labels.iter().flatten().max().map_or(0, |m| m + 1);
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); cluster_count];
    let mut noise = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        match label {
            Some(l) => groups[*l].push(i),
            None => noise.push(i),
        }
    }
    (groups, noise)
}
