//! Wire codec for scalar values
//!
//! Statements cross the store boundary with every parameter already encoded to a
//! [`WireValue`]; rows come back as wire values and are decoded per declared
//! [`ScalarKind`]. Dates and date-times travel as epoch milliseconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;

use crate::error::{OgmError, OgmResult};
use crate::query::WireValue;
use crate::schema::ScalarKind;
use crate::value::{NodeId, PropertyMap, Value};

/// Marker the store returns for a declared property that holds no value
pub const NULL_SENTINEL: &str = "  cypher.null";

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Encode/decode capability at the wire boundary
pub trait Codec: Send + Sync + fmt::Debug {
    /// Encode one scalar
    fn encode(&self, value: &Value) -> OgmResult<WireValue>;

    /// Decode one scalar of a declared kind; null and the sentinel decode to `Value::Null`
    fn decode(&self, kind: ScalarKind, wire: &WireValue) -> OgmResult<Value>;

    /// Encode a property bag as the store's structured literal (a map)
    fn encode_bag(&self, bag: &PropertyMap) -> OgmResult<WireValue> {
        let mut object = serde_json::Map::with_capacity(bag.len());
        for (name, value) in bag {
            object.insert(name.clone(), self.encode(value)?);
        }
        Ok(WireValue::Object(object))
    }

    fn encode_id(&self, id: &NodeId) -> WireValue {
        WireValue::String(id.as_str().to_string())
    }

    /// Whether a wire value means "no value"
    fn is_null(&self, wire: &WireValue) -> bool {
        match wire {
            WireValue::Null => true,
            WireValue::String(s) => s == NULL_SENTINEL,
            _ => false,
        }
    }
}

/// Default codec using JSON values as the wire representation
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

fn mismatch(kind: ScalarKind, wire: &WireValue) -> OgmError {
    OgmError::Codec(format!("cannot decode {} as {}", wire, kind))
}

pub(crate) fn date_to_millis(date: NaiveDate) -> i64 {
    date.signed_duration_since(NaiveDate::default()).num_days() * MILLIS_PER_DAY
}

pub(crate) fn datetime_to_millis(datetime: NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp_millis()
}

fn millis_to_datetime(millis: i64) -> OgmResult<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| OgmError::Codec(format!("timestamp {} out of range", millis)))
}

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> OgmResult<WireValue> {
        Ok(match value {
            Value::Null => WireValue::Null,
            Value::Integer(i) => WireValue::from(*i),
            Value::Boolean(b) => WireValue::Bool(*b),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(WireValue::Number)
                .ok_or_else(|| OgmError::Codec(format!("cannot encode non-finite float {}", f)))?,
            Value::Bytes(bytes) => WireValue::Array(bytes.iter().map(|b| WireValue::from(*b)).collect()),
            Value::Date(date) => WireValue::from(date_to_millis(*date)),
            Value::DateTime(datetime) => WireValue::from(datetime_to_millis(*datetime)),
            Value::String(s) => WireValue::String(s.clone()),
        })
    }

    fn decode(&self, kind: ScalarKind, wire: &WireValue) -> OgmResult<Value> {
        if self.is_null(wire) {
            return Ok(Value::Null);
        }
        match kind {
            ScalarKind::Integer => wire
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| mismatch(kind, wire)),
            ScalarKind::Boolean => wire
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| mismatch(kind, wire)),
            ScalarKind::Float => wire
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| mismatch(kind, wire)),
            ScalarKind::Bytes => {
                let items = wire.as_array().ok_or_else(|| mismatch(kind, wire))?;
                items
                    .iter()
                    .map(|item| {
                        item.as_u64()
                            .and_then(|b| u8::try_from(b).ok())
                            .ok_or_else(|| mismatch(kind, wire))
                    })
                    .collect::<OgmResult<Vec<u8>>>()
                    .map(Value::Bytes)
            }
            ScalarKind::Date => match wire {
                WireValue::Number(n) => {
                    let millis = n.as_i64().ok_or_else(|| mismatch(kind, wire))?;
                    Ok(Value::Date(millis_to_datetime(millis)?.date()))
                }
                WireValue::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|_| mismatch(kind, wire)),
                _ => Err(mismatch(kind, wire)),
            },
            ScalarKind::DateTime => match wire {
                WireValue::Number(n) => {
                    let millis = n.as_i64().ok_or_else(|| mismatch(kind, wire))?;
                    Ok(Value::DateTime(millis_to_datetime(millis)?))
                }
                WireValue::String(s) => s
                    .parse::<NaiveDateTime>()
                    .map(Value::DateTime)
                    .map_err(|_| mismatch(kind, wire)),
                _ => Err(mismatch(kind, wire)),
            },
            ScalarKind::String => match wire {
                WireValue::String(s) => Ok(Value::String(s.clone())),
                other => Ok(Value::String(other.to_string())),
            },
        }
    }
}
