//! Columnar frames: one time column plus labeled value columns
//!
//! Frames are the unit the transport returns and the cache stores. The time
//! column is ascending epoch milliseconds; every value column runs parallel
//! to it and carries a name and a label set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::types::Timestamp;

/// Series labels, kept sorted by key
pub type Labels = BTreeMap<String, String>;

/// Column types a frame can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// The frame's time column
    Time,
    /// Floating point samples
    Number,
    /// String samples
    String,
    /// Boolean samples
    Boolean,
}

impl FieldType {
    /// Get type name as string
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Time => "time",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
        }
    }
}

/// Nullable values of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum FieldValues {
    /// Number column
    Number(Vec<Option<f64>>),
    /// String column
    String(Vec<Option<String>>),
    /// Boolean column
    Boolean(Vec<Option<bool>>),
}

impl FieldValues {
    /// Type of the values held
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValues::Number(_) => FieldType::Number,
            FieldValues::String(_) => FieldType::String,
            FieldValues::Boolean(_) => FieldType::Boolean,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Number(v) => v.len(),
            FieldValues::String(v) => v.len(),
            FieldValues::Boolean(v) => v.len(),
        }
    }

    /// Whether the column has no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the rows in `range`
    pub fn retain_rows(&mut self, range: Range<usize>) {
        fn keep<T>(values: &mut Vec<T>, range: Range<usize>) {
            values.truncate(range.end);
            values.drain(..range.start.min(values.len()));
        }
        match self {
            FieldValues::Number(v) => keep(v, range),
            FieldValues::String(v) => keep(v, range),
            FieldValues::Boolean(v) => keep(v, range),
        }
    }

    /// Build `self[..head] ++ next ++ self[tail..]`
    ///
    /// Returns `None` when `next` holds a different type.
    pub fn spliced(&self, head: usize, next: &FieldValues, tail: usize) -> Option<FieldValues> {
        fn join<T: Clone>(prev: &[T], head: usize, next: &[T], tail: usize) -> Vec<T> {
            let mut out = Vec::with_capacity(head + next.len() + prev.len().saturating_sub(tail));
            out.extend_from_slice(&prev[..head]);
            out.extend_from_slice(next);
            out.extend_from_slice(&prev[tail..]);
            out
        }
        match (self, next) {
            (FieldValues::Number(p), FieldValues::Number(n)) => {
                Some(FieldValues::Number(join(p, head, n, tail)))
            }
            (FieldValues::String(p), FieldValues::String(n)) => {
                Some(FieldValues::String(join(p, head, n, tail)))
            }
            (FieldValues::Boolean(p), FieldValues::Boolean(n)) => {
                Some(FieldValues::Boolean(join(p, head, n, tail)))
            }
            _ => None,
        }
    }

    /// Approximate in-memory payload size in bytes
    pub fn estimated_size_bytes(&self) -> usize {
        match self {
            FieldValues::Number(v) => v.len() * std::mem::size_of::<f64>(),
            FieldValues::Boolean(v) => v.len(),
            FieldValues::String(v) => v.iter().map(|s| s.as_ref().map_or(0, String::len)).sum(),
        }
    }
}

/// A labeled value column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Column name
    pub name: String,
    /// Series labels
    #[serde(default)]
    pub labels: Labels,
    /// Column values, parallel to the frame's time column
    pub values: FieldValues,
}

impl Field {
    /// Create a number column
    pub fn number(name: impl Into<String>, labels: Labels, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            labels,
            values: FieldValues::Number(values),
        }
    }

    /// Identity of this column within its target
    pub fn identity(&self) -> FieldIdentity {
        FieldIdentity {
            field_type: self.values.field_type(),
            name: self.name.clone(),
            labels: self.labels.clone(),
        }
    }
}

/// Structural key distinguishing series within one target
///
/// Labels are an ordered map, so two label sets built in different orders
/// produce the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldIdentity {
    /// Column type
    pub field_type: FieldType,
    /// Column name
    pub name: String,
    /// Column labels
    pub labels: Labels,
}

impl fmt::Display for FieldIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{{", self.field_type.name(), self.name)?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={:?}", k, v)?;
        }
        f.write_str("}")
    }
}

/// Ordered columnar table returned for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Ref id of the target that produced this frame
    pub ref_id: String,
    /// Optional frame name
    #[serde(default)]
    pub name: Option<String>,
    /// Time column, ascending
    pub time: Vec<Timestamp>,
    /// Value columns
    pub fields: Vec<Field>,
}

impl Frame {
    /// Create a frame
    pub fn new(ref_id: impl Into<String>, time: Vec<Timestamp>, fields: Vec<Field>) -> Self {
        Self {
            ref_id: ref_id.into(),
            name: None,
            time,
            fields,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Whether the frame has no rows
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Series identity of the frame, taken from its first value column
    pub fn identity(&self) -> FieldIdentity {
        match self.fields.first() {
            Some(field) => field.identity(),
            None => FieldIdentity {
                field_type: FieldType::Time,
                name: self.name.clone().unwrap_or_default(),
                labels: Labels::new(),
            },
        }
    }

    /// Approximate in-memory payload size in bytes
    pub fn estimated_size_bytes(&self) -> usize {
        self.time.len() * std::mem::size_of::<Timestamp>()
            + self
                .fields
                .iter()
                .map(|f| f.values.estimated_size_bytes())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_identity_ignores_label_order() {
        let mut a = Labels::new();
        a.insert("job".to_string(), "api".to_string());
        a.insert("le".to_string(), "1".to_string());

        let mut b = Labels::new();
        b.insert("le".to_string(), "1".to_string());
        b.insert("job".to_string(), "api".to_string());

        let fa = Field::number("value", a, vec![]);
        let fb = Field::number("value", b, vec![]);
        assert_eq!(fa.identity(), fb.identity());
        assert_eq!(fa.identity().to_string(), r#"number|value|{job="api",le="1"}"#);
    }

    #[test]
    fn test_identity_distinguishes_type() {
        let number = Field::number("value", labels(&[("le", "1")]), vec![]);
        let string = Field {
            name: "value".to_string(),
            labels: labels(&[("le", "1")]),
            values: FieldValues::String(vec![]),
        };
        assert_ne!(number.identity(), string.identity());
    }

    #[test]
    fn test_retain_rows() {
        let mut values = FieldValues::Number(vec![Some(1.0), Some(2.0), None, Some(4.0)]);
        values.retain_rows(1..3);
        assert_eq!(values, FieldValues::Number(vec![Some(2.0), None]));

        values.retain_rows(0..0);
        assert!(values.is_empty());
    }

    #[test]
    fn test_spliced() {
        let prev = FieldValues::Number(vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let next = FieldValues::Number(vec![Some(20.0), Some(30.0)]);
        let out = prev.spliced(1, &next, 3).unwrap();
        assert_eq!(
            out,
            FieldValues::Number(vec![Some(1.0), Some(20.0), Some(30.0), Some(4.0)])
        );

        let wrong = FieldValues::Boolean(vec![Some(true)]);
        assert!(prev.spliced(1, &wrong, 3).is_none());
    }

    #[test]
    fn test_frame_identity_without_value_columns() {
        let mut frame = Frame::new("A", vec![1, 2], vec![]);
        frame.name = Some("heartbeat".to_string());
        let identity = frame.identity();
        assert_eq!(identity.field_type, FieldType::Time);
        assert_eq!(identity.name, "heartbeat");
    }

    #[test]
    fn test_estimated_size() {
        let frame = Frame::new(
            "A",
            vec![1, 2, 3],
            vec![Field::number("value", Labels::new(), vec![Some(1.0), None, Some(3.0)])],
        );
        assert_eq!(frame.estimated_size_bytes(), 3 * 8 + 3 * 8);
    }
}
