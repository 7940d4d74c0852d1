//! Capsule item keys, and the flat/nested dict conversion reporters use.
//!
//! A [`Key`] is either a bare string or an ordered tuple of strings. Tuples
//! model compound namespaces such as `("git", "main")`. [`flatten`]/[`nest`]
//! convert between a flat `Key -> Value` map and the nested JSON-ish shape a
//! reporter actually wants to write out.

use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};

/// Identifies a single item within an [`crate::Encapsulator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// A single-segment key, e.g. `"cwd"`.
    Single(String),
    /// A multi-segment key, e.g. `("git", "main")`.
    Tuple(Vec<String>),
}

impl Key {
    /// Returns the key's segments as a slice.
    pub fn segments(&self) -> &[String] {
        match self {
            Key::Single(s) => std::slice::from_ref(s),
            Key::Tuple(segs) => segs,
        }
    }

    fn into_segments(self) -> Vec<String> {
        match self {
            Key::Single(s) => vec![s],
            Key::Tuple(segs) => segs,
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Single(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Single(s)
    }
}

impl<const N: usize> From<[&str; N]> for Key {
    fn from(segs: [&str; N]) -> Self {
        Key::Tuple(segs.iter().map(|s| (*s).to_owned()).collect())
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::Single(s) => write!(f, "{s}"),
            Key::Tuple(segs) => write!(f, "({})", segs.join(", ")),
        }
    }
}

/// Raised by [`nest`] when one key's segments are a strict prefix of
/// another's, so a leaf value and a subtree would have to occupy the same
/// slot in the nested map.
#[derive(Debug, thiserror::Error)]
#[error("key conflicted: {short} and {long}")]
pub struct KeyConflict {
    short: Key,
    long: Key,
}

/// Flattens a nested JSON object into a `Key -> Value` map, the inverse of
/// [`nest`]. Non-object leaves (including arrays, strings, numbers, etc.)
/// become leaves of the flat map; nested objects are walked recursively.
pub fn flatten(nested: &Value) -> Vec<(Key, Value)> {
    let mut out = Vec::new();
    flatten_into(nested, &mut Vec::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<(Key, Value)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                prefix.push(k.clone());
                flatten_into(v, prefix, out);
                prefix.pop();
            }
        }
        leaf => {
            out.push((Key::Tuple(prefix.clone()), leaf.clone()));
        }
    }
}

/// Builds a nested JSON object from a `Key -> Value` map. Fails with
/// [`KeyConflict`] if any key's segments are a strict prefix of another's.
pub fn nest(flat: impl IntoIterator<Item = (Key, Value)>) -> Result<Value, KeyConflict> {
    let mut root = Map::new();
    for (key, value) in flat {
        let segs = key.into_segments();
        insert_path(&mut root, &segs, value)?;
    }
    Ok(Value::Object(root))
}

fn insert_path(root: &mut Map<String, Value>, segs: &[String], value: Value) -> Result<(), KeyConflict> {
    let (head, rest) = segs.split_first().expect("key must have at least one segment");
    if rest.is_empty() {
        match root.get(head) {
            Some(Value::Object(_)) => {
                return Err(KeyConflict {
                    short: Key::Tuple(segs.to_vec()),
                    long: Key::Tuple(segs.to_vec()),
                })
            }
            Some(_) | None => {
                root.insert(head.clone(), value);
            }
        }
        return Ok(());
    }

    match root.entry(head.clone()).or_insert_with(|| Value::Object(Map::new())) {
        Value::Object(sub) => insert_path(sub, rest, value),
        _ => Err(KeyConflict {
            short: Key::Tuple(vec![head.clone()]),
            long: Key::Tuple(segs.to_vec()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_nested_object() {
        let nested = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": {"f": {"g": 4}}});
        let mut flat = flatten(&nested);
        flat.sort_by(|a, b| a.0.segments().cmp(b.0.segments()));

        let expected: Vec<(Key, Value)> = vec![
            (["a"].into(), json!(1)),
            (["b", "c"].into(), json!(2)),
            (["b", "d"].into(), json!(3)),
            (["e", "f", "g"].into(), json!(4)),
        ];
        assert_eq!(flat, expected);
    }

    #[test]
    fn nest_flat_map() {
        let flat = vec![
            (["a"].into(), json!(1)),
            (["b", "c"].into(), json!(2)),
            (["b", "d"].into(), json!(3)),
        ];
        let nested = nest(flat).unwrap();
        assert_eq!(nested, json!({"a": 1, "b": {"c": 2, "d": 3}}));
    }

    #[test]
    fn round_trip_flatten_nest() {
        let nested = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": {"f": {"g": 4}}});
        let flat = flatten(&nested);
        let round_tripped = nest(flat).unwrap();
        assert_eq!(round_tripped, nested);
    }

    #[test]
    fn round_trip_nest_flatten() {
        let flat = vec![(["a"].into(), json!(1)), (["b", "c"].into(), json!(2))];
        let nested = nest(flat.clone()).unwrap();
        let mut back = flatten(&nested);
        back.sort_by(|a, b| a.0.segments().cmp(b.0.segments()));
        let mut expected = flat;
        expected.sort_by(|a, b| a.0.segments().cmp(b.0.segments()));
        assert_eq!(back, expected);
    }

    #[test]
    fn nest_rejects_prefix_conflict() {
        let flat = vec![(["a"].into(), json!(1)), (Key::Tuple(vec!["a".into(), "b".into()]), json!(2))];
        assert!(nest(flat).is_err());
    }
}
