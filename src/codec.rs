//! Wire codec for the tag-typed value tree.
//!
//! The server speaks a self-describing JSON subset. Primitives travel as
//! plain JSON; everything else travels as a `{"type": …, "value": …}`
//! envelope:
//!
//! | `type`     | `value` on the wire                         | in memory          |
//! |------------|---------------------------------------------|--------------------|
//! | `params`   | JSON object (a parameter bag)               | [`Value::Params`]  |
//! | `array`    | JSON array                                  | [`Value::Array`]   |
//! | `binary`   | canonical base64, no line wrapping          | [`Value::Binary`]  |
//! | `datetime` | ISO-8601 UTC instant with a `Z` suffix      | [`Value::DateTime`]|
//! | `long`     | decimal integer string                      | [`Value::Int`]     |
//! | `double`   | JSON number (or numeric string)             | [`Value::Double`]  |
//! | `string`   | JSON string                                 | [`Value::String`]  |
//!
//! Integers whose magnitude reaches 2^53 cannot survive a round-trip through
//! an IEEE double, so `encode` wraps them in a `long` envelope and `decode`
//! refuses them as bare JSON numbers.
//!
//! Decoding is strict about bag keys: a duplicate key anywhere in the
//! document is an error rather than a silent last-wins overwrite.

use std::cell::Cell;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value as Json};

use crate::error::CodecError;
use crate::value::{Params, Value};

/// Largest integer magnitude a plain JSON number may carry (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

const TAG_TYPE: &str = "type";
const TAG_VALUE: &str = "value";

const TYPE_PARAMS: &str = "params";
const TYPE_ARRAY: &str = "array";
const TYPE_BINARY: &str = "binary";
const TYPE_DATETIME: &str = "datetime";
const TYPE_LONG: &str = "long";
const TYPE_DOUBLE: &str = "double";
const TYPE_STRING: &str = "string";
/// Stands in for an integer literal too wide for 64 bits. Never encoded.
const TYPE_OVERSIZED: &str = "\u{0}oversized-integer";

// ── Public surface ─────────────────────────────────────────────────────

/// Encodes a value into its JSON wire form.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let json = to_json(value)?;
    serde_json::to_vec(&json).map_err(|e| CodecError::new(e.to_string()))
}

/// Encodes a parameter bag as a plain top-level JSON object.
///
/// Request bodies are bare bags, not `params` envelopes. An empty bag
/// encodes to `{}`.
pub fn encode_params(params: &Params) -> Result<Vec<u8>, CodecError> {
    let object = params_to_object(params)?;
    serde_json::to_vec(&Json::Object(object)).map_err(|e| CodecError::new(e.to_string()))
}

/// Decodes a JSON document into a value.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    from_json(&parse_strict(bytes)?)
}

/// Decodes a JSON document that must be a parameter bag.
///
/// The top-level object is always read as a plain bag, so a bag whose
/// only keys happen to be `type` and `value` survives a trip through
/// [`encode_params`].
pub fn decode_params(bytes: &[u8]) -> Result<Params, CodecError> {
    match parse_strict(bytes)? {
        Json::Object(map) => object_to_params(&map),
        other => Err(CodecError::new(format!(
            "expected a parameter bag at top level, found {}",
            from_json(&other)?.kind_name()
        ))),
    }
}

/// Lowers a value to a `serde_json::Value` in wire form.
pub fn to_json(value: &Value) -> Result<Json, CodecError> {
    let json = match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) if is_safe_integer(*n) => Json::from(*n),
        Value::Int(n) => envelope(TYPE_LONG, Json::String(n.to_string())),
        Value::Double(d) => Number::from_f64(*d)
            .map(Json::Number)
            .ok_or_else(|| CodecError::new(format!("double {d} has no JSON representation")))?,
        Value::String(s) => Json::String(s.clone()),
        Value::Binary(bytes) => envelope(TYPE_BINARY, Json::String(STANDARD.encode(bytes))),
        Value::DateTime(t) => envelope(TYPE_DATETIME, Json::String(format_datetime(t))),
        Value::Params(p) => envelope(TYPE_PARAMS, Json::Object(params_to_object(p)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(to_json(item).map_err(|e| e.within_index(i))?);
            }
            envelope(TYPE_ARRAY, Json::Array(out))
        }
    };
    Ok(json)
}

/// Lifts a `serde_json::Value` in wire form into the value tree.
pub fn from_json(json: &Json) -> Result<Value, CodecError> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => number_to_value(n),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => array_from_json(items).map(Value::Array),
        Json::Object(map) => match envelope_parts(map) {
            Some((tag, inner)) => envelope_to_value(tag, inner),
            None => object_to_params(map).map(Value::Params),
        },
    }
}

/// Formats an instant the way the server expects: UTC, `Z` suffix,
/// sub-second digits only when present.
pub fn format_datetime(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses a UTC instant. Offsets other than `Z` are rejected.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CodecError> {
    if !s.ends_with('Z') {
        return Err(CodecError::new(format!(
            "datetime `{s}` must be UTC with a `Z` suffix"
        )));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CodecError::new(format!("invalid datetime `{s}`: {e}")))
}

pub fn is_safe_integer(n: i64) -> bool {
    n.unsigned_abs() <= MAX_SAFE_INTEGER as u64
}

// ── Encoding helpers ───────────────────────────────────────────────────

fn envelope(tag: &str, value: Json) -> Json {
    let mut map = Map::with_capacity(2);
    map.insert(TAG_TYPE.to_owned(), Json::String(tag.to_owned()));
    map.insert(TAG_VALUE.to_owned(), value);
    Json::Object(map)
}

fn params_to_object(params: &Params) -> Result<Map<String, Json>, CodecError> {
    let mut map = Map::new();
    for (key, value) in params {
        if value.is_null() {
            continue;
        }
        map.insert(key.clone(), to_json(value).map_err(|e| e.within_key(key))?);
    }
    Ok(map)
}

// ── Decoding helpers ───────────────────────────────────────────────────

/// Splits an object into `(type, value)` if it has exactly the envelope
/// shape. Anything else is a plain bag.
fn envelope_parts(map: &Map<String, Json>) -> Option<(&str, &Json)> {
    if map.len() != 2 {
        return None;
    }
    let tag = map.get(TAG_TYPE)?.as_str()?;
    let inner = map.get(TAG_VALUE)?;
    Some((tag, inner))
}

fn envelope_to_value(tag: &str, inner: &Json) -> Result<Value, CodecError> {
    match tag {
        TYPE_PARAMS => match inner {
            Json::Object(map) => object_to_params(map).map(Value::Params),
            Json::Null => Ok(Value::Params(Params::new())),
            other => Err(unexpected(TYPE_PARAMS, "an object", other)),
        },
        TYPE_ARRAY => match inner {
            Json::Array(items) => array_from_json(items).map(Value::Array),
            Json::Null => Ok(Value::Array(Vec::new())),
            other => Err(unexpected(TYPE_ARRAY, "an array", other)),
        },
        TYPE_BINARY => {
            let text = inner
                .as_str()
                .ok_or_else(|| unexpected(TYPE_BINARY, "a base64 string", inner))?;
            STANDARD
                .decode(text)
                .map(Value::Binary)
                .map_err(|e| CodecError::new(format!("invalid base64 in binary envelope: {e}")))
        }
        TYPE_DATETIME => {
            let text = inner
                .as_str()
                .ok_or_else(|| unexpected(TYPE_DATETIME, "an ISO-8601 string", inner))?;
            parse_datetime(text).map(Value::DateTime)
        }
        TYPE_LONG => match inner {
            Json::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| CodecError::new(format!("invalid long `{text}`: {e}"))),
            // Inside a `long` envelope any i64 magnitude is acceptable.
            Json::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| CodecError::new(format!("long {n} does not fit in 64 bits"))),
            other => Err(unexpected(TYPE_LONG, "a decimal string", other)),
        },
        TYPE_DOUBLE => match inner {
            Json::Number(n) => n
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| CodecError::new(format!("invalid double {n}"))),
            Json::String(text) => text
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|e| CodecError::new(format!("invalid double `{text}`: {e}"))),
            other => Err(unexpected(TYPE_DOUBLE, "a number", other)),
        },
        TYPE_STRING => match inner {
            Json::String(s) => Ok(Value::String(s.clone())),
            other => Err(unexpected(TYPE_STRING, "a string", other)),
        },
        TYPE_OVERSIZED => Err(unsafe_integer(inner.as_str().unwrap_or_default())),
        unknown => Err(CodecError::new(format!("unknown envelope type `{unknown}`"))),
    }
}

fn number_to_value(n: &Number) -> Result<Value, CodecError> {
    if let Some(i) = n.as_i64() {
        if is_safe_integer(i) {
            return Ok(Value::Int(i));
        }
        return Err(unsafe_integer(n));
    }
    if n.is_u64() {
        return Err(unsafe_integer(n));
    }
    n.as_f64()
        .map(Value::Double)
        .ok_or_else(|| CodecError::new(format!("unrepresentable number {n}")))
}

fn unsafe_integer(n: impl fmt::Display) -> CodecError {
    CodecError::new(format!(
        "integer {n} exceeds 2^53 as a bare JSON number; the producer must wrap it in a \
         {{\"type\":\"long\",\"value\":\"{n}\"}} envelope"
    ))
}

fn object_to_params(map: &Map<String, Json>) -> Result<Params, CodecError> {
    let mut params = Params::new();
    for (key, json) in map {
        if json.is_null() {
            continue;
        }
        let value = from_json(json).map_err(|e| e.within_key(key))?;
        params.insert(key.clone(), value);
    }
    Ok(params)
}

fn array_from_json(items: &[Json]) -> Result<Vec<Value>, CodecError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| from_json(item).map_err(|e| e.within_index(i)))
        .collect()
}

fn unexpected(tag: &str, expected: &str, found: &Json) -> CodecError {
    let kind = match found {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    };
    CodecError::new(format!("`{tag}` envelope expects {expected}, found {kind}"))
}

// ── Strict JSON parsing ────────────────────────────────────────────────

/// Parses a document, rejecting duplicate keys.
///
/// serde_json hands integer literals wider than 64 bits to the visitor as
/// lossy doubles. A lexical pre-pass records every number literal in
/// document order so the visitor can tell `1e23` from
/// `100000000000000000000000` and refuse the latter.
fn parse_strict(bytes: &[u8]) -> Result<Json, CodecError> {
    let literals = number_literals(bytes);
    let next = Cell::new(0);
    let strict = Strict {
        literals: &literals,
        next: &next,
    };
    let mut de = serde_json::Deserializer::from_slice(bytes);
    strict
        .deserialize(&mut de)
        .and_then(|json| de.end().map(|()| json))
        .map_err(|e| CodecError::new(format!("malformed JSON: {e}")))
}

/// Number literals outside strings, in document order.
fn number_literals(bytes: &[u8]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' | b'0'..=b'9' => {
                let start = i;
                while i < bytes.len()
                    && matches!(bytes[i], b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9')
                {
                    i += 1;
                }
                out.push(std::str::from_utf8(&bytes[start..i]).unwrap_or_default());
            }
            _ => i += 1,
        }
    }
    out
}

fn is_integer_literal(text: &str) -> bool {
    !text.is_empty() && !text.contains(['.', 'e', 'E'])
}

/// Visitor that builds a `serde_json::Value`, checking bag keys for
/// duplicates and integer literals for width.
#[derive(Clone, Copy)]
struct Strict<'a> {
    literals: &'a [&'a str],
    next: &'a Cell<usize>,
}

impl<'a> Strict<'a> {
    fn take_literal(self) -> &'a str {
        let i = self.next.get();
        self.next.set(i + 1);
        self.literals.get(i).copied().unwrap_or_default()
    }
}

impl<'de> DeserializeSeed<'de> for Strict<'_> {
    type Value = Json;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Json, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for Strict<'_> {
    type Value = Json;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Json, E> {
        Ok(Json::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Json, E> {
        self.take_literal();
        Ok(Json::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Json, E> {
        self.take_literal();
        Ok(Json::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Json, E> {
        let literal = self.take_literal();
        if is_integer_literal(literal) {
            // `-0` also arrives here.
            if v == 0.0 {
                return Ok(Json::from(0));
            }
            return Ok(envelope(TYPE_OVERSIZED, Json::String(literal.to_owned())));
        }
        Number::from_f64(v)
            .map(Json::Number)
            .ok_or_else(|| E::custom("non-finite number"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Json, E> {
        Ok(Json::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Json, E> {
        Ok(Json::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Json, E> {
        Ok(Json::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Json, E> {
        Ok(Json::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Json, D::Error> {
        self.deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Json, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element_seed(self)? {
            items.push(item);
        }
        Ok(Json::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Json, A::Error> {
        let mut object = Map::new();
        while let Some(key) = access.next_key::<String>()? {
            let value = access.next_value_seed(self)?;
            if object.contains_key(&key) {
                return Err(de::Error::custom(format_args!("duplicate key `{key}`")));
            }
            object.insert(key, value);
        }
        Ok(Json::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn round_trip(v: &Value) -> Value {
        decode(&encode(v).unwrap()).unwrap()
    }

    // ── Encoding ─────────────────────────────────────────────────────

    #[test]
    fn empty_bag_encodes_to_empty_object() {
        assert_eq!(encode_params(&Params::new()).unwrap(), b"{}");
    }

    #[test]
    fn large_integer_is_wrapped_in_long_envelope() {
        let body = Params::new().with("nLicKeyId", 9_007_199_254_740_993_i64);
        let json: Json = serde_json::from_slice(&encode_params(&body).unwrap()).unwrap();
        assert_eq!(
            json,
            json!({"nLicKeyId": {"type": "long", "value": "9007199254740993"}})
        );
    }

    #[test]
    fn long_boundary_is_exactly_two_to_the_53() {
        let below = to_json(&Value::Int(MAX_SAFE_INTEGER)).unwrap();
        assert_eq!(below, json!(MAX_SAFE_INTEGER));

        let at = to_json(&Value::Int(MAX_SAFE_INTEGER + 1)).unwrap();
        assert_eq!(at, json!({"type": "long", "value": "9007199254740992"}));

        let negative = to_json(&Value::Int(-(MAX_SAFE_INTEGER + 1))).unwrap();
        assert_eq!(negative["type"], "long");

        let min = to_json(&Value::Int(i64::MIN)).unwrap();
        assert_eq!(min["value"], i64::MIN.to_string());
    }

    #[test]
    fn null_fields_are_stripped_from_bags() {
        let body = Params::new()
            .with("kept", 1)
            .with("dropped", Value::Null);
        assert_eq!(encode_params(&body).unwrap(), br#"{"kept":1}"#);
    }

    #[test]
    fn nested_bags_and_arrays_use_envelopes() {
        let body = Params::new().with(
            "pOptions",
            Params::new().with("fields", Value::strings(["a"])),
        );
        let json: Json = serde_json::from_slice(&encode_params(&body).unwrap()).unwrap();
        assert_eq!(
            json,
            json!({"pOptions": {"type": "params", "value": {
                "fields": {"type": "array", "value": ["a"]}
            }}})
        );
    }

    #[test]
    fn binary_is_canonical_base64() {
        let json = to_json(&Value::binary(vec![0xff_u8; 100])).unwrap();
        let text = json["value"].as_str().unwrap();
        assert!(!text.contains('\n'), "base64 must not be line-wrapped");
        assert_eq!(STANDARD.decode(text).unwrap(), vec![0xff_u8; 100]);
    }

    #[test]
    fn non_finite_double_is_an_encode_error_with_path() {
        let body = Params::new().with("inner", Params::new().with("ratio", f64::NAN));
        let err = encode_params(&body).unwrap_err();
        assert_eq!(err.path(), "$.inner.ratio");
    }

    // ── Decoding ─────────────────────────────────────────────────────

    #[test]
    fn envelopes_decode_at_any_depth() {
        let doc = br#"{"PxgRetVal":{"type":"params","value":{
            "when":{"type":"datetime","value":"2024-02-29T12:00:00Z"},
            "blob":{"type":"binary","value":"AAEC"},
            "big":{"type":"long","value":"9007199254740993"},
            "list":[{"type":"double","value":1.5},{"type":"string","value":"s"}]
        }}}"#;
        let bag = decode_params(doc).unwrap();
        let inner = bag.require_params("PxgRetVal").unwrap();
        assert_eq!(
            inner.get("when").unwrap().as_datetime().unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
        assert_eq!(inner.get("blob").unwrap().as_bytes(), Some(&[0u8, 1, 2][..]));
        assert_eq!(inner.require_i64("big").unwrap(), 9_007_199_254_740_993);
        let list = inner.require_array("list").unwrap();
        assert_eq!(list[0], Value::Double(1.5));
        assert_eq!(list[1], Value::String("s".into()));
    }

    #[test]
    fn unknown_envelope_type_reports_key_path() {
        let doc = br#"{"outer":{"type":"params","value":{"x":{"type":"matrix","value":1}}}}"#;
        let err = decode(doc).unwrap_err();
        assert_eq!(err.path(), "$.outer.x");
        assert!(err.message().contains("matrix"));
    }

    #[test]
    fn bare_integer_above_safe_range_is_rejected() {
        let err = decode(br#"{"n": 9007199254740993}"#).unwrap_err();
        assert_eq!(err.path(), "$.n");
        assert!(err.message().contains("long"), "message should point at long envelopes");

        let err = decode(br#"[18446744073709551615]"#).unwrap_err();
        assert_eq!(err.path(), "$[0]");
    }

    #[test]
    fn integer_literals_wider_than_64_bits_are_rejected() {
        let err = decode(br#"{"n": 123456789012345678901234}"#).unwrap_err();
        assert_eq!(err.path(), "$.n");
        assert!(err.message().contains("123456789012345678901234"));

        let err = decode(br#"{"n": -99999999999999999999}"#).unwrap_err();
        assert_eq!(err.path(), "$.n");

        let err = decode(br#"{"a":{"type":"array","value":[1, 100000000000000000000]}}"#)
            .unwrap_err();
        assert_eq!(err.path(), "$.a[1]");
    }

    #[test]
    fn float_literals_of_any_magnitude_still_decode() {
        let bag = decode_params(br#"{"big": 1e22, "neg": -1.5E20, "zero": -0}"#).unwrap();
        assert_eq!(bag.get("big"), Some(&Value::Double(1e22)));
        assert_eq!(bag.get("neg"), Some(&Value::Double(-1.5e20)));
        assert_eq!(bag.get("zero"), Some(&Value::Int(0)));
    }

    #[test]
    fn digits_inside_strings_are_not_number_literals() {
        let doc = br#"{"s":"say \"99999999999999999999999\" 1e5","d":2.5,"n":7}"#;
        let bag = decode_params(doc).unwrap();
        assert_eq!(bag.get("d"), Some(&Value::Double(2.5)));
        assert_eq!(bag.require_i64("n").unwrap(), 7);
    }

    #[test]
    fn top_level_bag_shaped_like_an_envelope_round_trips() {
        let body = Params::new().with("type", "string").with("value", "x");
        assert_eq!(decode_params(&encode_params(&body).unwrap()).unwrap(), body);

        let body = Params::new()
            .with("type", "params")
            .with("value", Params::new().with("a", 1));
        assert_eq!(decode_params(&encode_params(&body).unwrap()).unwrap(), body);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = decode(br#"{"a":1,"a":2}"#).unwrap_err();
        assert!(err.message().contains("duplicate key"));
    }

    #[test]
    fn non_utc_datetime_is_rejected() {
        let doc = br#"{"t":{"type":"datetime","value":"2024-01-01T00:00:00+02:00"}}"#;
        let err = decode(doc).unwrap_err();
        assert_eq!(err.path(), "$.t");
    }

    #[test]
    fn wrapped_base64_is_rejected() {
        let doc = b"{\"b\":{\"type\":\"binary\",\"value\":\"AAEC\\nAAEC\"}}";
        assert!(decode(doc).is_err());
    }

    #[test]
    fn null_in_bag_means_absent() {
        let bag = decode_params(br#"{"a":null,"b":1}"#).unwrap();
        assert_eq!(bag.len(), 1);
        assert!(!bag.contains_key("a"));
    }

    #[test]
    fn empty_containers_are_valid() {
        let bag = decode_params(br#"{"a":[],"b":{},"c":{"type":"array","value":[]}}"#).unwrap();
        assert_eq!(bag.get("a"), Some(&Value::Array(vec![])));
        assert_eq!(bag.get("b"), Some(&Value::Params(Params::new())));
        assert_eq!(bag.get("c"), Some(&Value::Array(vec![])));
    }

    // ── Round trips ──────────────────────────────────────────────────

    #[test]
    fn mixed_tree_round_trips() {
        let tree = Value::Params(
            Params::new()
                .with("s", "text with \"quotes\" and \u{1} control")
                .with("b", true)
                .with("i", -42)
                .with("big", i64::MAX)
                .with("d", 0.25)
                .with("whole", 2.0)
                .with("bin", Value::binary(b"\x00\xffraw".to_vec()))
                .with("when", Utc.timestamp_millis_opt(1_700_000_000_123).unwrap())
                .with(
                    "arr",
                    Value::Array(vec![Value::Int(1), Value::from("two"), Params::new().into()]),
                ),
        );
        assert_eq!(round_trip(&tree), tree);
    }

    #[test]
    fn datetime_round_trips_at_millisecond_precision() {
        for millis in [0_i64, 1, 999, 1_234_567_890_123, -86_400_001] {
            let t = Utc.timestamp_millis_opt(millis).unwrap();
            assert_eq!(parse_datetime(&format_datetime(&t)).unwrap(), t);
        }
    }

    #[test]
    fn whole_seconds_format_without_fraction() {
        let t = Utc.with_ymd_and_hms(2021, 3, 24, 11, 39, 33).unwrap();
        assert_eq!(format_datetime(&t), "2021-03-24T11:39:33Z");
    }
}
