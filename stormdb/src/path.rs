// Dot-notation field paths, parsed once and reused for every lookup

use crate::value::{Map, Reference, Value, REF_KEY};
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// An ordered list of key/index segments addressing a value inside a document.
///
/// Numeric segments are parsed as [`Segment::Index`] but still fall back to a
/// key lookup when the container at that point is an object, so `"scores.0"`
/// works against both `{"scores": [..]}` and `{"scores": {"0": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| match s.parse::<usize>() {
                Ok(i) => Segment::Index(i),
                Err(_) => Segment::Key(s.to_string()),
            })
            .collect();
        FieldPath { segments }
    }

    pub fn root() -> Self {
        FieldPath::default()
    }

    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        FieldPath { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolve the path against a document map.
    pub fn get<'a>(&self, map: &'a Map) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = lookup_in_map(map, first)?;
        for segment in rest {
            current = step(current, segment)?;
        }
        Some(current)
    }

    /// Resolve the path for querying. Unlike [`FieldPath::get`] this also walks
    /// into a reference as if it were its stored marker, so `author._ref.id`,
    /// `author._ref.collection` and `author._id` address the pointer's parts.
    pub fn lookup<'a>(&self, map: &'a Map) -> Option<Cow<'a, Value>> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = lookup_in_map(map, first)?;
        for (i, segment) in rest.iter().enumerate() {
            if let Value::Reference(reference) = current {
                return reference_part(reference, &rest[i..]).map(Cow::Owned);
            }
            current = step(current, segment)?;
        }
        Some(Cow::Borrowed(current))
    }

    /// Set the value at this path, creating intermediate objects as needed.
    /// Returns `false` when an intermediate value exists but is not a container.
    pub fn set(&self, map: &mut Map, value: Value) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            return false;
        };
        let mut current = map;
        for segment in parents {
            let key = segment_key(segment);
            let entry = current
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            match entry {
                Value::Object(inner) => current = inner,
                _ => return false,
            }
        }
        current.insert(segment_key(last), value);
        true
    }

    /// Remove the value at this path. Missing paths are a no-op.
    pub fn remove(&self, map: &mut Map) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = map;
        for segment in parents {
            match current.get_mut(&segment_key(segment))? {
                Value::Object(inner) => current = inner,
                _ => return None,
            }
        }
        current.shift_remove(&segment_key(last))
    }
}

fn segment_key(segment: &Segment) -> String {
    match segment {
        Segment::Key(k) => k.clone(),
        Segment::Index(i) => i.to_string(),
    }
}

fn lookup_in_map<'a>(map: &'a Map, segment: &Segment) -> Option<&'a Value> {
    match segment {
        Segment::Key(k) => map.get(k),
        Segment::Index(i) => map.get(&i.to_string()),
    }
}

fn step<'a>(value: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match (value, segment) {
        (Value::Object(map), segment) => lookup_in_map(map, segment),
        (Value::Array(items), Segment::Index(i)) => items.get(*i),
        _ => None,
    }
}

fn reference_part(reference: &Reference, segments: &[Segment]) -> Option<Value> {
    let keys: Vec<&str> = segments
        .iter()
        .map(|segment| match segment {
            Segment::Key(k) => Some(k.as_str()),
            Segment::Index(_) => None,
        })
        .collect::<Option<_>>()?;
    let id = || Value::String(reference.id.clone());
    let collection = || Value::String(reference.collection.clone());
    match keys.as_slice() {
        ["_id"] | [REF_KEY, "id"] => Some(id()),
        [REF_KEY, "collection"] => Some(collection()),
        [REF_KEY] => Some(Value::Object(Map::from_iter([
            ("collection".to_string(), collection()),
            ("id".to_string(), id()),
        ]))),
        _ => None,
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Key(k) => f.write_str(k)?,
                Segment::Index(idx) => write!(f, "{idx}")?,
            }
        }
        Ok(())
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::parse(path)
    }
}
