//! Tolerant field access over a decoded payload.
//!
//! Every field the generator reports is read through [`Fields`], which tries a
//! short key, then a long alias, then gives up and lets the caller default.
//! Generators often emit placeholder values (`""`, `0`, `false`, `[]`, `{}`)
//! under the short key; those fall through to the long key. Every string that
//! comes out is trimmed, and a blank string counts as absent. This is the one
//! place where the payload schema is allowed to evolve.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// A view over one sub-object of the payload (e.g. `p` / `pattern`).
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    /// Select the first of `short` / `long` that holds an object. A missing
    /// or non-object section yields an empty view.
    pub fn section(root: &'a Map<String, Value>, short: &str, long: &str) -> Self {
        let map = [short, long]
            .into_iter()
            .find_map(|key| root.get(key).and_then(Value::as_object));
        Self { map }
    }

    /// An empty view; every accessor returns its fallback.
    pub fn empty() -> Self {
        Self { map: None }
    }

    fn values(&self, short: &'a str, long: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        let map = self.map;
        [short, long]
            .into_iter()
            .filter_map(move |key| map.and_then(|m| m.get(key)))
            .filter(|v| !v.is_null())
    }

    /// First non-blank string; scalars are stringified.
    pub fn str(&self, short: &'a str, long: &'a str) -> Option<String> {
        self.values(short, long).find_map(coerce_str)
    }

    /// First non-zero finite number; numeric strings are parsed. A present
    /// zero is returned only when no key holds a non-zero value.
    pub fn num(&self, short: &'a str, long: &'a str) -> Option<f64> {
        let mut zero_seen = false;
        for n in self.values(short, long).filter_map(coerce_num) {
            if n != 0.0 {
                return Some(n);
            }
            zero_seen = true;
        }
        zero_seen.then_some(0.0)
    }

    /// `true` when either key holds a truthy value.
    pub fn flag(&self, short: &'a str, long: &'a str) -> bool {
        self.values(short, long).any(truthy)
    }

    /// First array with a non-blank element, elements stringified and blanks
    /// dropped. Non-arrays are skipped.
    pub fn strings(&self, short: &'a str, long: &'a str) -> Vec<String> {
        self.values(short, long)
            .filter_map(Value::as_array)
            .map(|items| items.iter().filter_map(coerce_str).collect::<Vec<_>>())
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }

    /// First object with a non-blank value, values stringified and blanks
    /// dropped. Arrays and scalars are skipped.
    pub fn string_map(&self, short: &'a str, long: &'a str) -> BTreeMap<String, String> {
        self.values(short, long)
            .filter_map(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| coerce_str(v).map(|s| (k.clone(), s)))
                    .collect::<BTreeMap<_, _>>()
            })
            .find(|m| !m.is_empty())
            .unwrap_or_default()
    }
}

/// Trimmed string form of `v`; `None` for null and blank strings.
fn coerce_str(v: &Value) -> Option<String> {
    let s = match v {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

fn coerce_num(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Some(0.0)
            } else {
                t.parse::<f64>().ok()
            }
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    n.filter(|x| x.is_finite())
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => {
            let t = s.trim();
            !(t.is_empty() || t == "0" || t.eq_ignore_ascii_case("false"))
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}
