// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use geo_types::Point;
use serde_json::Value;

/// Attribute map of a feature. `serde_json::Map` is ordered by key, which keeps
/// serialized output stable between runs.
pub type Properties = serde_json::Map<String, Value>;

pub const META_SOURCE: &str = "meta_source";
pub const META_SOURCE_DATASET: &str = "meta_source_dataset";
pub const META_PREFIX: &str = "meta_";

pub const BICYCLE_PARKING: &str = "bicycle_parking";
pub const OPERATOR: &str = "operator";
pub const CAPACITY: &str = "capacity";
pub const QUANTITY: &str = "quantity";
pub const DESCRIPTION: &str = "description";

/// A single bicycle parking record: a WGS84 point plus its attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub point: Point<f64>,
    pub properties: Properties,
}

impl Feature {
    pub fn new(lon: f64, lat: f64, properties: Properties) -> Self {
        Self {
            point: Point::new(lon, lat),
            properties,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    /// `bicycle_parking` equals `kind`. A missing tag never matches.
    pub fn is_parking_type(&self, kind: &str) -> bool {
        self.get_str(BICYCLE_PARKING) == Some(kind)
    }

    /// Name of the originating dataset, falling back to `meta_source` for
    /// sources that only publish one dataset.
    pub fn source_dataset(&self) -> Option<&str> {
        self.get_str(META_SOURCE_DATASET)
            .or_else(|| self.get_str(META_SOURCE))
    }

    /// Attribute keys holding a non-null value.
    pub fn present_keys(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.as_str())
    }

    pub fn strip_meta(&mut self) {
        self.properties.retain(|k, _| !k.starts_with(META_PREFIX));
    }
}

/// Renders an attribute value the way it is compared and concatenated:
/// strings verbatim, everything else as JSON text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric reading of an attribute; numeric strings are accepted since some
/// feeds publish capacities as text.
pub fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// All features published by one source dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub features: Vec<Feature>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            name: name.into(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::projection::{PlanarPoint, planar_to_geographic};
    use serde_json::json;

    /// Builds a feature placed at planar coordinates (metres, UTM 17N) so tests
    /// can reason about exact distances.
    pub fn feature_at(x: f64, y: f64, props: Value) -> Feature {
        let geo = planar_to_geographic(PlanarPoint::new(x, y));
        let properties = match props {
            Value::Object(map) => map,
            _ => Properties::new(),
        };
        Feature {
            point: geo,
            properties,
        }
    }

    /// Downtown Toronto, near Queen and Yonge.
    pub const ORIGIN_X: f64 = 630_000.0;
    pub const ORIGIN_Y: f64 = 4_834_000.0;

    pub fn civic_rack(dataset: &str, dx: f64, dy: f64, extra: Value) -> Feature {
        let mut f = feature_at(
            ORIGIN_X + dx,
            ORIGIN_Y + dy,
            json!({
                "amenity": "bicycle_parking",
                "bicycle_parking": "rack",
                "operator": "City of Toronto",
                "meta_source": "City of Toronto",
                "meta_source_dataset": dataset,
            }),
        );
        if let Value::Object(map) = extra {
            f.properties.extend(map);
        }
        f
    }
}
