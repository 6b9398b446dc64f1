//! Property change tracking
//!
//! Every scalar property of a live instance is held in a [`PropertyCell`] that keeps
//! the current value plus an ordered log of changes since the last successful write.
//! Numeric increments, decrements and scaling are logged as deltas so the store can
//! apply them server-side; anything touching a textual value is logged as a replace.

use std::cmp::Ordering;

use crate::condition::Condition;
use crate::error::{OgmError, OgmResult};
use crate::value::Value;

/// One recorded mutation of a property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    Replace(Value),
    Add(Value),
    Subtract(Value),
    Multiply(Value),
}

impl PropertyChange {
    /// Operator symbol and operand for delta changes; `None` for a replace
    pub fn delta(&self) -> Option<(&'static str, &Value)> {
        match self {
            PropertyChange::Replace(_) => None,
            PropertyChange::Add(v) => Some(("+", v)),
            PropertyChange::Subtract(v) => Some(("-", v)),
            PropertyChange::Multiply(v) => Some(("*", v)),
        }
    }
}

/// Arithmetic delta kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Add,
    Subtract,
    Multiply,
}

impl DeltaKind {
    fn name(&self) -> &'static str {
        match self {
            DeltaKind::Add => "add",
            DeltaKind::Subtract => "subtract",
            DeltaKind::Multiply => "multiply",
        }
    }

    fn record(&self, delta: Value) -> PropertyChange {
        match self {
            DeltaKind::Add => PropertyChange::Add(delta),
            DeltaKind::Subtract => PropertyChange::Subtract(delta),
            DeltaKind::Multiply => PropertyChange::Multiply(delta),
        }
    }

    fn apply_int(&self, a: i64, b: i64) -> Option<i64> {
        match self {
            DeltaKind::Add => a.checked_add(b),
            DeltaKind::Subtract => a.checked_sub(b),
            DeltaKind::Multiply => a.checked_mul(b),
        }
    }

    fn apply_float(&self, a: f64, b: f64) -> f64 {
        match self {
            DeltaKind::Add => a + b,
            DeltaKind::Subtract => a - b,
            DeltaKind::Multiply => a * b,
        }
    }
}

/// Current value of a property plus its change log
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyCell {
    value: Value,
    changes: Vec<PropertyChange>,
}

impl PropertyCell {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            changes: Vec::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn changes(&self) -> &[PropertyChange] {
        &self.changes
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Whether the log holds a replace, so the current value must be written whole
    pub fn needs_replace(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c, PropertyChange::Replace(_)))
    }

    /// Plain assignment
    pub fn set(&mut self, value: impl Into<Value>) {
        let value = value.into();
        self.changes.push(PropertyChange::Replace(value.clone()));
        self.value = value;
    }

    pub fn add(&mut self, delta: impl Into<Value>) -> OgmResult<()> {
        self.apply(DeltaKind::Add, delta.into())
    }

    pub fn subtract(&mut self, delta: impl Into<Value>) -> OgmResult<()> {
        self.apply(DeltaKind::Subtract, delta.into())
    }

    pub fn multiply(&mut self, factor: impl Into<Value>) -> OgmResult<()> {
        self.apply(DeltaKind::Multiply, factor.into())
    }

    /// Value the cell would hold after the delta, without recording anything
    pub fn preview(&self, op: DeltaKind, delta: &Value) -> OgmResult<Value> {
        let mismatch = || OgmError::TypeMismatch {
            expected: "numeric operand",
            found: delta.type_name(),
        };
        match (&self.value, delta) {
            (Value::Integer(a), Value::Integer(b)) => op
                .apply_int(*a, *b)
                .map(Value::Integer)
                .ok_or_else(|| OgmError::InvalidOperation(format!("integer overflow on {}", op.name()))),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let a = self.value.as_float().ok_or_else(mismatch)?;
                let b = delta.as_float().ok_or_else(mismatch)?;
                Ok(Value::Float(op.apply_float(a, b)))
            }
            (Value::String(s), Value::String(suffix)) if op == DeltaKind::Add => {
                Ok(Value::String(format!("{}{}", s, suffix)))
            }
            (Value::String(s), Value::Integer(n)) if op == DeltaKind::Multiply => {
                let count = usize::try_from(*n).unwrap_or(0);
                Ok(Value::String(s.repeat(count)))
            }
            (current, _) => Err(OgmError::TypeMismatch {
                expected: "numeric value",
                found: current.type_name(),
            }),
        }
    }

    /// Apply and record a delta
    pub fn apply(&mut self, op: DeltaKind, delta: Value) -> OgmResult<()> {
        let next = self.preview(op, &delta)?;
        if self.value.is_textual() {
            self.changes.push(PropertyChange::Replace(next.clone()));
        } else {
            self.changes.push(op.record(delta));
        }
        self.value = next;
        Ok(())
    }

    /// Empty the change log; the current value becomes the new baseline
    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    /// Drop the first `count` changes once they have been written
    pub(crate) fn drain_changes(&mut self, count: usize) {
        let count = count.min(self.changes.len());
        self.changes.drain(..count);
    }

    /// Overwrite the value from the store without logging a change
    pub(crate) fn reset(&mut self, value: Value) {
        self.value = value;
        self.changes.clear();
    }
}

impl PartialEq<Value> for PropertyCell {
    fn eq(&self, other: &Value) -> bool {
        self.value == *other
    }
}

impl PartialOrd<Value> for PropertyCell {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        self.value.partial_cmp(other)
    }
}

/// A cell used inside a condition contributes its current value as a literal
impl From<&PropertyCell> for Condition {
    fn from(cell: &PropertyCell) -> Self {
        Condition::Value(cell.value.clone())
    }
}
