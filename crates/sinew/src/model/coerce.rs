//! Payload coercion: raw `serde_json` payload values in, runtime values
//! out. Coercion normalizes; validation accumulates. A failed coercion
//! is reported as a validation error on the attribute, never raised.

use crate::model::AttrKind;
use serde_json::Value as Json;
use sinew_core::value::Value;
use std::{collections::BTreeMap, rc::Rc};

///
/// AttrParser
///
/// External string-to-typed-value parser collaborator, registered on the
/// session by name and addressed from `AttrKind::Parsed`.
///

pub trait AttrParser {
    fn parse(&self, raw: &str) -> Result<Value, String>;
}

pub(crate) type ParserTable = BTreeMap<String, Rc<dyn AttrParser>>;

/// Coerce one raw payload value according to the attribute kind.
pub(crate) fn coerce(
    kind: &AttrKind,
    raw: &Json,
    parsers: &ParserTable,
) -> Result<Value, String> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    match kind {
        AttrKind::Any => json_to_value(raw),
        AttrKind::Bool => raw
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| format!("expected a boolean, got {raw}")),
        AttrKind::Int => raw
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| format!("expected an integer, got {raw}")),
        AttrKind::Uint => raw
            .as_u64()
            .map(Value::Uint)
            .ok_or_else(|| format!("expected an unsigned integer, got {raw}")),
        AttrKind::Float => raw
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| format!("expected a number, got {raw}")),
        AttrKind::Text => raw
            .as_str()
            .map(Value::from)
            .ok_or_else(|| format!("expected a string, got {raw}")),
        AttrKind::Parsed(parser_name) => {
            let text = raw
                .as_str()
                .ok_or_else(|| format!("expected a string for '{parser_name}', got {raw}"))?;
            let parser = parsers
                .get(parser_name)
                .ok_or_else(|| format!("no parser registered under '{parser_name}'"))?;
            parser.parse(text)
        }
    }
}

/// Structural JSON-to-Value conversion for untyped attributes.
pub(crate) fn json_to_value(raw: &Json) -> Result<Value, String> {
    match raw {
        Json::Null => Ok(Value::Null),
        Json::Bool(v) => Ok(Value::Bool(*v)),
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Value::Int(v))
            } else if let Some(v) = n.as_u64() {
                Ok(Value::Uint(v))
            } else if let Some(v) = n.as_f64() {
                Ok(Value::Float(v))
            } else {
                Err(format!("unrepresentable number: {n}"))
            }
        }
        Json::String(v) => Ok(Value::Text(v.clone())),
        Json::Object(entries) => {
            let mut out = BTreeMap::new();
            for (key, value) in entries {
                out.insert(key.clone(), json_to_value(value)?);
            }
            Ok(Value::Map(out))
        }
        Json::Array(_) => Err("array payloads only apply to hasMany associations".to_string()),
    }
}

/// Serialize one attribute value back into its payload representation.
/// Entity and collection handles have no scalar representation and
/// serialize as null.
pub(crate) fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null | Value::Obj(_) | Value::Seq(_) => Json::Null,
        Value::Bool(v) => Json::Bool(*v),
        Value::Int(v) => Json::from(*v),
        Value::Uint(v) => Json::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::Text(v) => Json::String(v.clone()),
        Value::Map(entries) => {
            let mut out = serde_json::Map::new();
            for (key, item) in entries {
                out.insert(key.clone(), value_to_json(item));
            }
            Json::Object(out)
        }
    }
}
