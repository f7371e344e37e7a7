// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Reading normalized source datasets and writing display files.

use crate::error::{ConflationError, io_err};
use crate::feature::{Dataset, Feature, Properties};
use crate::projection::{geographic_to_planar, planar_to_geographic};
use crate::references::{ExclusionEntry, IdentifierSet, exclusions_from_entries};
use crate::zones::ExemptZone;
use geo::{Centroid, Coord, MapCoords, MultiPolygon, Point};
use geojson::{FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

const REF_PREFIX: &str = "ref:";

fn read_to_string(path: &Path) -> Result<String, ConflationError> {
    fs::read_to_string(path).map_err(|e| io_err!(path, e))
}

fn read_feature_collection(path: &Path) -> Result<FeatureCollection, ConflationError> {
    let geojson: GeoJson = read_to_string(path)?.parse()?;
    Ok(FeatureCollection::try_from(geojson)?)
}

/// Identifiers are compared as text, so numeric `ref:` values are rewritten
/// as strings. Nulls are dropped.
fn normalize_properties(properties: Option<JsonObject>) -> Properties {
    properties
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::Number(n) if k.starts_with(REF_PREFIX) => {
                    serde_json::Value::String(match n.as_f64() {
                        Some(f) if n.is_f64() && f.fract() == 0.0 => format!("{}", f as i64),
                        _ => n.to_string(),
                    })
                }
                other => other,
            };
            (k, v)
        })
        .collect()
}

fn position_point(position: &[f64]) -> Option<Point<f64>> {
    match position {
        [lon, lat, ..] => Some(Point::new(*lon, *lat)),
        _ => None,
    }
}

/// Centroid of a way or area, taken in planar coordinates like every other
/// distance computation here.
fn planar_centroid_of(geometry: &geo::Geometry<f64>) -> Option<Point<f64>> {
    let planar = geometry.map_coords(|c| {
        let p = geographic_to_planar(Point::from(c));
        Coord { x: p.x(), y: p.y() }
    });
    planar.centroid().map(planar_to_geographic)
}

fn geometry_kind(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn unsupported(dataset: &str, kind: &str) -> ConflationError {
    ConflationError::UnsupportedGeometry {
        dataset: dataset.to_string(),
        kind: kind.to_string(),
    }
}

/// Points of one GeoJSON geometry: multipoints are exploded, lines and
/// polygons reduce to their centroid.
fn geometry_points(dataset: &str, geometry: Option<Geometry>) -> Result<Vec<Point<f64>>, ConflationError> {
    let Some(geometry) = geometry else {
        return Err(unsupported(dataset, "null geometry"));
    };
    match geometry.value {
        Value::Point(position) => position_point(&position)
            .map(|p| vec![p])
            .ok_or_else(|| unsupported(dataset, "empty Point")),
        Value::MultiPoint(positions) => positions
            .iter()
            .map(|position| position_point(position).ok_or_else(|| unsupported(dataset, "empty MultiPoint member")))
            .collect(),
        Value::GeometryCollection(_) => Err(unsupported(dataset, "GeometryCollection")),
        value => {
            let kind = geometry_kind(&value);
            let geometry = geo::Geometry::<f64>::try_from(value)?;
            planar_centroid_of(&geometry)
                .map(|p| vec![p])
                .ok_or_else(|| unsupported(dataset, kind))
        }
    }
}

pub fn dataset_from_geojson(name: &str, collection: FeatureCollection) -> Result<Dataset, ConflationError> {
    let mut features = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let properties = normalize_properties(feature.properties);
        for point in geometry_points(name, feature.geometry)? {
            features.push(Feature {
                point,
                properties: properties.clone(),
            });
        }
    }
    Ok(Dataset::new(name, features))
}

/// Loads `<dir>/<name>-normalized.geojson`.
pub fn load_normalized_dataset(dir: &Path, name: &str) -> Result<Dataset, ConflationError> {
    let path = dir.join(format!("{name}-normalized.geojson"));
    let dataset = dataset_from_geojson(name, read_feature_collection(&path)?)?;
    debug!("Loaded {} features from {}", dataset.len(), path.display());
    Ok(dataset)
}

pub fn load_exclusions(path: &Path) -> Result<IdentifierSet, ConflationError> {
    let entries: Vec<ExclusionEntry> = serde_json::from_str(&read_to_string(path)?)?;
    exclusions_from_entries(&entries)
}

/// Reads every polygon of a GeoJSON file as one exemption zone, named by its
/// `name` property when present.
pub fn load_exempt_zones(path: &Path) -> Result<Vec<ExemptZone>, ConflationError> {
    let dataset_name = path.display().to_string();
    let mut zones = Vec::new();
    for (i, feature) in read_feature_collection(path)?.features.into_iter().enumerate() {
        let name = feature
            .property("name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("zone {i}"));
        let Some(geometry) = feature.geometry else {
            return Err(unsupported(&dataset_name, "null geometry"));
        };
        let area = match geo::Geometry::<f64>::try_from(geometry.value)? {
            geo::Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            geo::Geometry::MultiPolygon(multi) => multi,
            _ => return Err(unsupported(&dataset_name, "non-polygon exemption zone")),
        };
        zones.push(ExemptZone::new(name, &area));
    }
    Ok(zones)
}

pub fn to_feature_collection(features: &[Feature], strip_meta: bool) -> FeatureCollection {
    let features = features
        .iter()
        .map(|f| {
            let mut f = f.clone();
            if strip_meta {
                f.strip_meta();
            }
            geojson::Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![f.point.x(), f.point.y()]))),
                id: None,
                properties: Some(f.properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Pretty printed with sorted property keys, so equal inputs give equal bytes.
pub fn to_geojson_string(features: &[Feature], strip_meta: bool) -> Result<String, ConflationError> {
    let geojson = GeoJson::FeatureCollection(to_feature_collection(features, strip_meta));
    let mut text = serde_json::to_string_pretty(&geojson)?;
    text.push('\n');
    Ok(text)
}

pub fn write_geojson(path: &Path, features: &[Feature], strip_meta: bool) -> Result<(), ConflationError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err!(parent, e))?;
    }
    fs::write(path, to_geojson_string(features, strip_meta)?).map_err(|e| io_err!(path, e))?;
    debug!("Wrote {} features to {}", features.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bikeparking-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn collection(value: serde_json::Value) -> FeatureCollection {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_multipoint_is_exploded() {
        let fc = collection(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "MultiPoint", "coordinates": [[-79.38, 43.65], [-79.39, 43.66]]},
                "properties": {"capacity": 4, "fee": null}
            }]
        }));
        let dataset = dataset_from_geojson("racks", fc).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.features[1].point, Point::new(-79.39, 43.66));
        assert!(!dataset.features[0].properties.contains_key("fee"));
    }

    #[test]
    fn test_ref_values_become_text() {
        let fc = collection(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [-79.38, 43.65]},
                "properties": {"ref:open.toronto.ca:bicycle-parking-racks:objectid": 123, "capacity": 8}
            }]
        }));
        let dataset = dataset_from_geojson("racks", fc).unwrap();
        let f = &dataset.features[0];
        assert_eq!(f.get_str("ref:open.toronto.ca:bicycle-parking-racks:objectid"), Some("123"));
        assert_eq!(f.get("capacity"), Some(&json!(8)));
    }

    #[test]
    fn test_polygon_reduces_to_centroid() {
        let fc = collection(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "Polygon", "coordinates": [[
                    [-79.3801, 43.6501], [-79.3799, 43.6501], [-79.3799, 43.6499],
                    [-79.3801, 43.6499], [-79.3801, 43.6501]
                ]]},
                "properties": {"bicycle_parking": "shed"}
            }]
        }));
        let dataset = dataset_from_geojson("osm", fc).unwrap();
        let p = dataset.features[0].point;
        assert!((p.x() + 79.38).abs() < 1e-6);
        assert!((p.y() - 43.65).abs() < 1e-6);
    }

    #[test]
    fn test_null_geometry_is_rejected() {
        let fc = collection(json!({
            "type": "FeatureCollection",
            "features": [{"type": "Feature", "geometry": null, "properties": {}}]
        }));
        assert!(matches!(
            dataset_from_geojson("osm", fc),
            Err(ConflationError::UnsupportedGeometry { .. })
        ));
    }

    #[test]
    fn test_write_and_reload() {
        let dir = scratch_dir("roundtrip");
        let props = json!({"capacity": 6, "meta_source": "City of Toronto"});
        let features = vec![Feature::new(-79.38, 43.65, props.as_object().cloned().unwrap())];

        let path = dir.join("out").join("racks-normalized.geojson");
        write_geojson(&path, &features, true).unwrap();
        let reloaded = load_normalized_dataset(&dir.join("out"), "racks").unwrap();
        assert_eq!(reloaded.features[0].point, features[0].point);
        assert_eq!(reloaded.features[0].get("capacity"), Some(&json!(6)));
        assert!(reloaded.features[0].get("meta_source").is_none());

        let text = to_geojson_string(&features, false).unwrap();
        assert_eq!(text, to_geojson_string(&features, false).unwrap());
        assert!(text.contains("\"meta_source\": \"City of Toronto\""));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_normalized_dataset(Path::new("/nonexistent"), "racks").unwrap_err();
        assert!(matches!(err, ConflationError::Io { path, .. } if path.ends_with("racks-normalized.geojson")));
    }

    #[test]
    fn test_exclusions_and_zones_from_files() {
        let dir = scratch_dir("inputs");
        let exclusions = dir.join("exclusions.json");
        fs::write(&exclusions, r#"[{"ids": [{"ref:open.toronto.ca:bicycle-parking-racks:objectid": "9"}]}]"#).unwrap();
        let ids = load_exclusions(&exclusions).unwrap();
        assert!(ids.contains("ref:open.toronto.ca:bicycle-parking-racks:objectid", "9"));

        let zones = dir.join("zones.geojson");
        fs::write(
            &zones,
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": {"type": "Polygon", "coordinates": [[
                        [-79.381, 43.651], [-79.379, 43.651], [-79.379, 43.649],
                        [-79.381, 43.649], [-79.381, 43.651]
                    ]]},
                    "properties": {"name": "campus"}
                }]
            })
            .to_string(),
        )
        .unwrap();
        let zones = load_exempt_zones(&zones).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name, "campus");
        assert!(zones[0].covers(&Feature::new(-79.38, 43.65, Properties::new())));
        fs::remove_dir_all(&dir).unwrap();
    }
}
