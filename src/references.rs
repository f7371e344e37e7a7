// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Matching civic records against OpenStreetMap, which carries better curated
//! copies of many of them.
//!
//! Three signals are used:
//! - `ref:<civic prefix>...` tags on OSM features name the civic ids they
//!   replace
//! - OSM features operated by the civic authority are presumed to duplicate a
//!   civic record even without a ref tag
//! - a hand-maintained exclusion list removes civic records known to be wrong
//!
//! An explicit ref tag always wins over the operator heuristic: a tagged OSM
//! feature is kept even when its operator is the authority, and a tag value of
//! `no` keeps the feature without claiming any civic id.

use crate::error::ConflationError;
use crate::feature::{Feature, OPERATOR, value_text};
use ahash::{AHashMap, AHashSet};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Tag value used on OSM to say a feature has no civic counterpart.
pub const NEGATIVE_REFERENCE: &str = "no";

pub const LOCKERS: &str = "lockers";

/// Identifier values grouped by the attribute they appear under.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentifierSet {
    by_field: AHashMap<String, AHashSet<String>>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (field, id) in pairs {
            set.insert(field, id);
        }
        set
    }

    pub fn insert(&mut self, field: impl Into<String>, id: impl Into<String>) {
        self.by_field
            .entry(field.into())
            .or_default()
            .insert(id.into());
    }

    pub fn contains(&self, field: &str, id: &str) -> bool {
        self.by_field
            .get(field)
            .is_some_and(|ids| ids.contains(id))
    }

    /// True when any attribute of `feature` holds an id listed for that
    /// attribute.
    pub fn matches(&self, feature: &Feature) -> bool {
        feature.properties.iter().any(|(field, value)| {
            !value.is_null()
                && self
                    .by_field
                    .get(field)
                    .is_some_and(|ids| ids.contains(value_text(value).trim()))
        })
    }

    pub fn len(&self) -> usize {
        self.by_field.values().map(|ids| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One record of the manual exclusion file:
/// `{"ids": [{"ref:open.toronto.ca:bicycle-parking-racks:objectid": "123"}]}`.
/// Other keys (notes, reviewer) are ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct ExclusionEntry {
    pub ids: Vec<BTreeMap<String, serde_json::Value>>,
}

pub fn exclusions_from_entries(entries: &[ExclusionEntry]) -> Result<IdentifierSet, ConflationError> {
    let mut set = IdentifierSet::new();
    for entry in entries {
        for id in &entry.ids {
            let mut pairs = id.iter();
            match (pairs.next(), pairs.next()) {
                (Some((field, value)), None) if !value.is_null() => {
                    set.insert(field.clone(), value_text(value).trim().to_string());
                }
                _ => {
                    return Err(ConflationError::MalformedExclusion(format!(
                        "expected exactly one field/id pair, got {}",
                        serde_json::to_string(id)?
                    )));
                }
            }
        }
    }
    Ok(set)
}

pub fn exclusions_from_json(json: &str) -> Result<IdentifierSet, ConflationError> {
    let entries: Vec<ExclusionEntry> = serde_json::from_str(json)?;
    exclusions_from_entries(&entries)
}

/// Case-insensitive match of an authority name inside free-text operator
/// tags, allowing any whitespace between words ("City of Toronto",
/// "city oftoronto", "CITY  OF TORONTO").
#[derive(Clone, Debug)]
pub struct OperatorMatcher {
    pattern: Regex,
}

impl OperatorMatcher {
    pub fn new(authority: &str) -> Result<Self, ConflationError> {
        let words: Vec<String> = authority.split_whitespace().map(regex::escape).collect();
        if words.is_empty() {
            return Err(ConflationError::InvalidAuthorityName(authority.to_string()));
        }
        let pattern = Regex::new(&format!(r"(?i){}", words.join(r"\s*")))
            .map_err(|_| ConflationError::InvalidAuthorityName(authority.to_string()))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        feature
            .get_str(OPERATOR)
            .is_some_and(|operator| self.pattern.is_match(operator))
    }
}

fn reference_values<'a>(feature: &'a Feature, prefix: &'a str) -> impl Iterator<Item = (&'a str, String)> + 'a {
    feature
        .properties
        .iter()
        .filter(move |(key, value)| key.starts_with(prefix) && !value.is_null())
        .map(|(key, value)| (key.as_str(), value_text(value).trim().to_string()))
        .filter(|(_, text)| !text.is_empty())
}

/// An OSM feature carrying any non-empty civic ref tag, including `no`.
pub fn is_reference_verified(feature: &Feature, prefix: &str) -> bool {
    reference_values(feature, prefix).next().is_some()
}

/// Every civic id named by a ref tag on an OSM feature. Tags holding several
/// ids separated by `;` claim each of them.
pub fn collect_claimed_ids(crowd: &[Feature], prefix: &str) -> IdentifierSet {
    let mut claimed = IdentifierSet::new();
    for feature in crowd {
        for (field, text) in reference_values(feature, prefix) {
            for id in text.split(';').map(str::trim) {
                if !id.is_empty() && !id.eq_ignore_ascii_case(NEGATIVE_REFERENCE) {
                    claimed.insert(field, id);
                }
            }
        }
    }
    claimed
}

/// Removes features whose identifier attributes appear in `ids`, returning
/// the survivors and the number dropped.
pub fn drop_matching(features: Vec<Feature>, ids: &IdentifierSet) -> (Vec<Feature>, usize) {
    let before = features.len();
    let kept: Vec<Feature> = features.into_iter().filter(|f| !ids.matches(f)).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// OSM features to keep: ref-verified ones first, then everything the
/// operator heuristic does not claim for the civic authority. Lockers are
/// always kept since no civic locker id exists to verify them against.
pub fn filter_crowd_sourced(
    crowd: &[Feature],
    prefix: &str,
    authority: &OperatorMatcher,
) -> Vec<Feature> {
    let (verified, unverified): (Vec<&Feature>, Vec<&Feature>) = crowd
        .iter()
        .partition(|f| is_reference_verified(f, prefix));

    verified
        .into_iter()
        .chain(
            unverified
                .into_iter()
                .filter(|f| !authority.matches(f) || f.is_parking_type(LOCKERS)),
        )
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    const PREFIX: &str = "ref:city";

    fn feature(props: Value) -> Feature {
        Feature::new(-79.38, 43.65, props.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_semicolon_lists_claim_every_id() {
        let osm = vec![feature(json!({"ref:city:id": "123;456"}))];
        let claimed = collect_claimed_ids(&osm, PREFIX);
        assert!(claimed.contains("ref:city:id", "123"));
        assert!(claimed.contains("ref:city:id", "456"));
        assert_eq!(claimed.len(), 2);

        let civic = vec![
            feature(json!({"ref:city:id": "123"})),
            feature(json!({"ref:city:id": "456"})),
            feature(json!({"ref:city:id": "789"})),
        ];
        let (kept, dropped) = drop_matching(civic, &claimed);
        assert_eq!(dropped, 2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].get_str("ref:city:id"), Some("789"));
    }

    #[test]
    fn test_ids_only_match_their_own_field() {
        let claimed = IdentifierSet::from_pairs([("ref:city:id", "123")]);
        assert!(!claimed.matches(&feature(json!({"ref:city:objectid": "123"}))));
        assert!(claimed.matches(&feature(json!({"ref:city:id": 123}))));
    }

    #[test]
    fn test_negative_reference_verifies_without_claiming() {
        let osm = vec![feature(json!({"ref:city:id": "no", "operator": "City of Toronto"}))];
        assert!(is_reference_verified(&osm[0], PREFIX));
        assert!(collect_claimed_ids(&osm, PREFIX).is_empty());

        let matcher = OperatorMatcher::new("City of Toronto").unwrap();
        assert_eq!(filter_crowd_sourced(&osm, PREFIX, &matcher).len(), 1);
    }

    #[test]
    fn test_operator_matcher_ignores_case_and_spacing() {
        let matcher = OperatorMatcher::new("City of Toronto").unwrap();
        for operator in ["City of Toronto", "city oftoronto", "CITY  OF TORONTO", "The City of Toronto Parks"] {
            assert!(matcher.matches(&feature(json!({"operator": operator}))), "{operator}");
        }
        assert!(!matcher.matches(&feature(json!({"operator": "Toronto Parking Authority"}))));
        assert!(!matcher.matches(&feature(json!({}))));
        assert!(OperatorMatcher::new("   ").is_err());
    }

    #[test]
    fn test_filter_crowd_sourced() {
        let matcher = OperatorMatcher::new("City of Toronto").unwrap();
        let osm = vec![
            feature(json!({"operator": "City of Toronto", "bicycle_parking": "rack"})),
            feature(json!({"operator": "City of Toronto", "ref:city:id": "5"})),
            feature(json!({"operator": "City of Toronto", "bicycle_parking": "lockers"})),
            feature(json!({"operator": "Metrolinx", "bicycle_parking": "rack"})),
            feature(json!({"bicycle_parking": "stands"})),
        ];
        let kept = filter_crowd_sourced(&osm, PREFIX, &matcher);
        assert_eq!(kept, osm[1..].to_vec());
    }

    #[test]
    fn test_verified_features_come_first() {
        let matcher = OperatorMatcher::new("City of Toronto").unwrap();
        let osm = vec![
            feature(json!({"bicycle_parking": "stands"})),
            feature(json!({"ref:city:id": "9"})),
        ];
        let kept = filter_crowd_sourced(&osm, PREFIX, &matcher);
        assert_eq!(kept, vec![osm[1].clone(), osm[0].clone()]);
    }

    #[test]
    fn test_exclusion_file() {
        let json = r#"[
            {"ids": [{"ref:city:id": "10"}, {"ref:city:objectid": 22}], "note": "removed in 2023"},
            {"ids": [{"ref:city:id": "11"}]}
        ]"#;
        let exclusions = exclusions_from_json(json).unwrap();
        assert_eq!(exclusions.len(), 3);
        assert!(exclusions.contains("ref:city:objectid", "22"));

        let bad = r#"[{"ids": [{"ref:city:id": "10", "ref:city:objectid": "3"}]}]"#;
        assert!(matches!(
            exclusions_from_json(bad),
            Err(ConflationError::MalformedExclusion(_))
        ));
    }
}
