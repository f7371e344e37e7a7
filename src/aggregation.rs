// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Field-by-field merge rules applied when a cluster collapses into one record.

use crate::error::ConflationError;
use crate::feature::{Feature, Properties, value_number, value_text};
use ahash::AHashMap;
use geo::Point;
use itertools::Itertools;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Placeholder bucket for missing or empty values in frequency summaries.
pub const NULL_BUCKET: &str = "null";

pub const NARRATIVE_DIVIDER: &str = "\n---\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reducer {
    /// First present value in member order
    First,
    /// Numeric sum, missing counts as zero
    Sum,
    /// Numeric minimum of the present values
    Min,
    /// The common value, or a `value (n=count)` listing when members disagree
    FrequencySummary,
    /// Present values joined with the separator, in member order
    Join(&'static str),
    /// Fixed value, written on every aggregated record
    Constant(&'static str),
    /// Preamble warning about likely duplicates, then every member's value.
    /// Always written, even when no member carries the field.
    Narrative {
        heading: &'static str,
        noun: &'static str,
    },
}

impl Reducer {
    pub fn reduce(&self, values: &[Option<&Value>]) -> Option<Value> {
        match *self {
            Reducer::First => values.iter().flatten().next().map(|v| (*v).clone()),
            Reducer::Sum => {
                let total: f64 = values.iter().flatten().filter_map(|v| value_number(v)).sum();
                Some(number_value(total))
            }
            Reducer::Min => values
                .iter()
                .flatten()
                .filter_map(|v| value_number(v))
                .reduce(f64::min)
                .map(number_value),
            Reducer::FrequencySummary => frequency_summary(values),
            Reducer::Join(separator) => {
                let present: Vec<String> = values.iter().flatten().map(|v| value_text(v)).collect();
                if present.is_empty() {
                    None
                } else {
                    Some(Value::String(present.join(separator)))
                }
            }
            Reducer::Constant(value) => Some(Value::String(value.to_string())),
            Reducer::Narrative { heading, noun } => {
                let n = values.len();
                let blurb = format!(
                    "{heading}\nThis point is a combination of {n} {noun} from multiple datasets. \
                     In many cases, these may be duplicate entries and there will be fewer than {n} {noun} present."
                );
                let parts = std::iter::once(blurb).chain(
                    values
                        .iter()
                        .map(|v| v.map_or_else(|| NULL_BUCKET.to_string(), value_text)),
                );
                Some(Value::String(parts.collect::<Vec<_>>().join(NARRATIVE_DIVIDER)))
            }
        }
    }

    fn always_written(&self) -> bool {
        matches!(self, Reducer::Constant(_) | Reducer::Narrative { .. })
    }
}

/// Whole numbers stay integers in the output so capacities read `6`, not `6.0`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn frequency_summary(values: &[Option<&Value>]) -> Option<Value> {
    let bucket = |v: &Option<&Value>| match v {
        Some(value) => {
            let text = value_text(value);
            if text.is_empty() {
                NULL_BUCKET.to_string()
            } else {
                text
            }
        }
        None => NULL_BUCKET.to_string(),
    };

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(bucket(v)).or_default() += 1;
    }

    match counts.len() {
        0 => None,
        1 => values
            .iter()
            .flatten()
            .find(|v| value_text(v) != NULL_BUCKET && !value_text(v).is_empty())
            .map(|v| (*v).clone()),
        _ => Some(Value::String(
            counts
                .iter()
                .map(|(value, count)| format!("{value} (n={count})"))
                .join("\n"),
        )),
    }
}

/// A named table of reducers, one per attribute.
#[derive(Clone, Debug)]
pub struct AggregationPolicy {
    name: &'static str,
    rules: AHashMap<&'static str, Reducer>,
}

impl AggregationPolicy {
    pub fn new(name: &'static str, rules: &[(&'static str, Reducer)]) -> Self {
        Self {
            name,
            rules: rules.iter().copied().collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn rule(&self, field: &str) -> Option<Reducer> {
        self.rules.get(field).copied()
    }

    fn missing_rule(&self, field: &str) -> ConflationError {
        ConflationError::MissingAggregationRule {
            policy: self.name,
            field: field.to_string(),
        }
    }

    /// Fails on the first attribute that has no rule. Run this before any
    /// clustering so an incomplete table never produces partial output.
    pub fn validate<'a>(
        &self,
        features: impl IntoIterator<Item = &'a Feature>,
    ) -> Result<(), ConflationError> {
        for feature in features {
            if let Some(field) = feature.present_keys().find(|k| !self.rules.contains_key(*k)) {
                return Err(self.missing_rule(field));
            }
        }
        Ok(())
    }

    /// Merges `members` into a single feature placed at `point`.
    pub fn aggregate(
        &self,
        members: &[&Feature],
        point: Point<f64>,
    ) -> Result<Feature, ConflationError> {
        let mut fields: BTreeSet<&str> = members.iter().flat_map(|m| m.present_keys()).collect();
        fields.extend(
            self.rules
                .iter()
                .filter(|(_, reducer)| reducer.always_written())
                .map(|(field, _)| *field),
        );

        let mut properties = Properties::new();
        for field in fields {
            let reducer = self.rule(field).ok_or_else(|| self.missing_rule(field))?;
            let values: Vec<Option<&Value>> = members.iter().map(|m| m.get(field)).collect();
            if let Some(value) = reducer.reduce(&values) {
                properties.insert(field.to_string(), value);
            }
        }

        Ok(Feature { point, properties })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(props: Value) -> Feature {
        Feature::new(-79.38, 43.65, props.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_min_is_conservative() {
        let values = [json!(6), json!(8), json!(4)];
        let refs: Vec<Option<&Value>> = values.iter().map(Some).collect();
        assert_eq!(Reducer::Min.reduce(&refs), Some(json!(4)));
        assert_eq!(Reducer::Min.reduce(&[None, None]), None);
    }

    #[test]
    fn test_sum_treats_missing_as_zero() {
        let a = json!(2);
        let b = json!("3");
        assert_eq!(Reducer::Sum.reduce(&[Some(&a), None, Some(&b)]), Some(json!(5)));
    }

    #[test]
    fn test_first_skips_missing() {
        let a = json!("yes");
        assert_eq!(Reducer::First.reduce(&[None, Some(&a)]), Some(json!("yes")));
    }

    #[test]
    fn test_frequency_summary_agreeing_values() {
        let a = json!("no");
        assert_eq!(
            Reducer::FrequencySummary.reduce(&[Some(&a), Some(&a)]),
            Some(json!("no"))
        );
        let empty = json!("");
        assert_eq!(Reducer::FrequencySummary.reduce(&[None, Some(&empty)]), None);
    }

    #[test]
    fn test_frequency_summary_disagreeing_values() {
        let yes = json!("yes");
        let no = json!("no");
        let out = Reducer::FrequencySummary.reduce(&[Some(&yes), None, Some(&no), Some(&yes)]);
        assert_eq!(out, Some(json!("no (n=1)\nnull (n=1)\nyes (n=2)")));
    }

    #[test]
    fn test_join_preserves_member_order() {
        let a = json!("12");
        let b = json!(7);
        assert_eq!(
            Reducer::Join(";").reduce(&[Some(&a), None, Some(&b)]),
            Some(json!("12;7"))
        );
        assert_eq!(Reducer::Join(";").reduce(&[None]), None);
    }

    #[test]
    fn test_narrative_counts_members() {
        let a = json!("Location: Front St");
        let reducer = Reducer::Narrative {
            heading: "MULTIPLE RACKS",
            noun: "bicycle racks",
        };
        let Some(Value::String(text)) = reducer.reduce(&[Some(&a), None]) else {
            panic!("narrative should always produce text");
        };
        let parts: Vec<&str> = text.split(NARRATIVE_DIVIDER).collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].starts_with("MULTIPLE RACKS\n"));
        assert!(parts[0].contains("combination of 2 bicycle racks"));
        assert_eq!(parts[1], "Location: Front St");
        assert_eq!(parts[2], "null");
    }

    #[test]
    fn test_constant_is_written_without_members_carrying_it() {
        let policy = AggregationPolicy::new(
            "test",
            &[("capacity", Reducer::Min), ("source", Reducer::Constant("merged"))],
        );
        let a = feature(json!({"capacity": 2}));
        let b = feature(json!({"capacity": 3}));
        let merged = policy.aggregate(&[&a, &b], a.point).unwrap();
        assert_eq!(merged.get_str("source"), Some("merged"));
        assert_eq!(merged.get("capacity"), Some(&json!(2)));
    }

    #[test]
    fn test_missing_rule_is_an_error() {
        let policy = AggregationPolicy::new("test", &[("capacity", Reducer::Sum)]);
        let f = feature(json!({"capacity": 2, "colour": "red"}));
        let err = policy.validate([&f]).unwrap_err();
        assert!(matches!(
            err,
            ConflationError::MissingAggregationRule { field, .. } if field == "colour"
        ));
        assert!(policy.aggregate(&[&f], f.point).is_err());
    }

    #[test]
    fn test_aggregate_applies_rules() {
        let policy = AggregationPolicy::new(
            "test",
            &[
                ("capacity", Reducer::Sum),
                ("covered", Reducer::FrequencySummary),
                ("id", Reducer::Join(";")),
            ],
        );
        let a = feature(json!({"capacity": 2, "covered": "no", "id": "1"}));
        let b = feature(json!({"capacity": 2, "covered": "no", "id": "2", "ignored": null}));
        let merged = policy.aggregate(&[&a, &b], Point::new(1.0, 2.0)).unwrap();
        assert_eq!(merged.point, Point::new(1.0, 2.0));
        assert_eq!(merged.get("capacity"), Some(&json!(4)));
        assert_eq!(merged.get_str("covered"), Some("no"));
        assert_eq!(merged.get_str("id"), Some("1;2"));
        assert!(!merged.properties.contains_key("ignored"));
    }
}
