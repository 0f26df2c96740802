//! Open key/value payloads and timestamp helpers.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::{Map, Value};

/// Caller-defined key/value payload. Key order is preserved.
pub type Data = Map<String, Value>;

/// Conversion into a [`Data`] payload.
///
/// JSON objects map directly and `null` becomes an empty payload. Any other
/// value is wrapped as `{"value": ...}` so nothing the caller passes is lost.
pub trait IntoData {
    fn into_data(self) -> Data;
}

impl IntoData for Data {
    fn into_data(self) -> Data {
        self
    }
}

impl IntoData for Value {
    fn into_data(self) -> Data {
        match self {
            Value::Object(map) => map,
            Value::Null => Data::new(),
            other => {
                let mut map = Data::new();
                map.insert("value".to_string(), other);
                map
            }
        }
    }
}

impl<K: Into<String>, V: Into<Value>> IntoData for Vec<(K, V)> {
    fn into_data(self) -> Data {
        self.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }
}

/// Shallow-merges `data` into `target`, creating it if absent.
///
/// Keys in `data` overwrite keys of the same name; every other existing key
/// is kept.
pub fn merge_data(target: &mut Option<Data>, data: Data) {
    let existing = target.get_or_insert_with(Data::new);
    for (key, value) in data {
        existing.insert(key, value);
    }
}

/// Current UTC time truncated to millisecond precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Formats `ts` as RFC 3339 UTC with a `Z` suffix and at least millisecond
/// digits, e.g. `2023-11-14T22:13:20.000Z`. Sub-millisecond digits are kept.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let precision = if ts.timestamp_subsec_nanos() % 1_000_000 == 0 {
        SecondsFormat::Millis
    } else {
        SecondsFormat::Nanos
    };
    ts.to_rfc3339_opts(precision, true)
}

pub(crate) fn serialize_timestamp<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

pub(crate) fn serialize_timestamp_opt<S: Serializer>(
    ts: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => serialize_timestamp(ts, serializer),
        None => serializer.serialize_none(),
    }
}

/// Reads a field that is present in the input, keeping an explicit `null`
/// as `Some(Value::Null)`. Absent fields fall back to `#[serde(default)]`.
pub(crate) fn deserialize_present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}
