//! Conversion between value types at consumption time
//!
//! Ports flagged `coerced` receive values converted with [`coerce`].
//! Control-flow-excluded values are never coerced.

use crate::error::{EngineError, Result};
use crate::value::{ChatMessage, ChatRole, DataType, DataValue, ScalarType};

/// Convert `value` to `target`, evaluating lazy values first
pub fn coerce(value: &DataValue, target: DataType) -> Result<DataValue> {
    if value.is_excluded() {
        return Err(EngineError::ExcludedCoercion);
    }
    if target.lazy {
        // fn<T> targets accept the evaluated value wrapped as a constant thunk
        let evaluated = coerce(value, target.evaluated())?;
        return Ok(DataValue::Function(crate::value::LazyValue::constant(evaluated)));
    }

    let value = value.clone().unwrap_lazy();
    if value.is_excluded() {
        return Err(EngineError::ExcludedCoercion);
    }
    if target.is_any() || value.data_type() == target {
        return Ok(value);
    }

    if target.array {
        let items = match value.arrayize() {
            Some(items) => items,
            None => vec![value],
        };
        let element = target.element();
        let items = items
            .iter()
            .map(|item| coerce(item, element))
            .collect::<Result<Vec<_>>>()?;
        return Ok(DataValue::array(target.scalar, items));
    }

    match target.scalar {
        ScalarType::String => coerce_to_string(&value).map(DataValue::String),
        ScalarType::Number => coerce_to_number(&value).map(DataValue::Number),
        ScalarType::Boolean => Ok(DataValue::Boolean(coerce_to_bool(&value)?)),
        ScalarType::ChatMessage => coerce_to_chat_message(&value).map(DataValue::ChatMessage),
        ScalarType::Object => Ok(DataValue::Object(coerce_to_object(&value)?)),
        ScalarType::Date => coerce_to_string(&value).map(DataValue::Date),
        ScalarType::Time => coerce_to_string(&value).map(DataValue::Time),
        ScalarType::DateTime => coerce_to_string(&value).map(DataValue::DateTime),
        _ => from_json_payload(&value, target),
    }
}

/// Coerce when the value is present, passing `None` through
pub fn coerce_optional(value: Option<&DataValue>, target: DataType) -> Result<Option<DataValue>> {
    value.map(|v| coerce(v, target)).transpose()
}

/// String form of a value; arrays join their items with newlines
pub fn coerce_to_string(value: &DataValue) -> Result<String> {
    let value = value.clone().unwrap_lazy();
    Ok(match &value {
        DataValue::ControlFlowExcluded(_) => return Err(EngineError::ExcludedCoercion),
        DataValue::String(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::DateTime(s) => {
            s.clone()
        }
        DataValue::Number(n) => format_number(*n),
        DataValue::Boolean(b) => b.to_string(),
        DataValue::ChatMessage(m) => m.message.clone(),
        DataValue::Document(d) => d.content.clone(),
        DataValue::Array(array) => array
            .items
            .iter()
            .map(coerce_to_string)
            .collect::<Result<Vec<_>>>()?
            .join("\n"),
        DataValue::Any(serde_json::Value::String(s)) => s.clone(),
        DataValue::Any(serde_json::Value::Null) => String::new(),
        DataValue::Any(v) | DataValue::Object(v) => serde_json::to_string(v)?,
        other => serde_json::to_string(&other.payload_json())?,
    })
}

pub fn coerce_to_number(value: &DataValue) -> Result<f64> {
    let value = value.clone().unwrap_lazy();
    let mismatch = |value: &DataValue| EngineError::Coercion {
        from: value.data_type().to_string(),
        to: DataType::NUMBER.to_string(),
    };
    match &value {
        DataValue::ControlFlowExcluded(_) => Err(EngineError::ExcludedCoercion),
        DataValue::Number(n) => Ok(*n),
        DataValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        DataValue::String(s) => s.trim().parse::<f64>().map_err(|_| mismatch(&value)),
        DataValue::Any(v) => match v {
            serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(&value)),
            serde_json::Value::String(s) => s.trim().parse::<f64>().map_err(|_| mismatch(&value)),
            serde_json::Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            _ => Err(mismatch(&value)),
        },
        DataValue::Array(array) if array.items.len() == 1 => coerce_to_number(&array.items[0]),
        _ => Err(mismatch(&value)),
    }
}

/// Truthiness: `"false"`, `"0"` and `""` are false, numbers are true when non-zero
pub fn coerce_to_bool(value: &DataValue) -> Result<bool> {
    let value = value.clone().unwrap_lazy();
    Ok(match &value {
        DataValue::ControlFlowExcluded(_) => return Err(EngineError::ExcludedCoercion),
        DataValue::Boolean(b) => *b,
        DataValue::Number(n) => *n != 0.0 && !n.is_nan(),
        DataValue::String(s) => string_truthy(s),
        DataValue::ChatMessage(m) => string_truthy(&m.message),
        DataValue::Array(array) => !array.items.is_empty(),
        DataValue::Vector(v) => !v.is_empty(),
        DataValue::Any(v) | DataValue::Object(v) => match v {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            serde_json::Value::String(s) => string_truthy(s),
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(_) => true,
        },
        _ => true,
    })
}

pub fn coerce_to_chat_message(value: &DataValue) -> Result<ChatMessage> {
    let value = value.clone().unwrap_lazy();
    match value {
        DataValue::ControlFlowExcluded(_) => Err(EngineError::ExcludedCoercion),
        DataValue::ChatMessage(m) => Ok(m),
        DataValue::Any(v) | DataValue::Object(v) if v.get("message").is_some() => {
            serde_json::from_value(v).map_err(EngineError::from)
        }
        other => Ok(ChatMessage {
            role: ChatRole::User,
            message: coerce_to_string(&other)?,
            name: None,
        }),
    }
}

pub fn coerce_to_object(value: &DataValue) -> Result<serde_json::Value> {
    let value = value.clone().unwrap_lazy();
    match value {
        DataValue::ControlFlowExcluded(_) => Err(EngineError::ExcludedCoercion),
        DataValue::Object(v) | DataValue::Any(v) => Ok(v),
        DataValue::String(s) => Ok(serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))),
        other => Ok(other.payload_json()),
    }
}

fn from_json_payload(value: &DataValue, target: DataType) -> Result<DataValue> {
    let mismatch = || EngineError::Coercion {
        from: value.data_type().to_string(),
        to: target.to_string(),
    };
    match value {
        DataValue::Any(v) | DataValue::Object(v) => {
            DataValue::from_payload(target, v.clone()).map_err(|_| mismatch())
        }
        _ => Err(mismatch()),
    }
}

fn string_truthy(s: &str) -> bool {
    !(s.is_empty() || s == "false" || s == "0")
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
