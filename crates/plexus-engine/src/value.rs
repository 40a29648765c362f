//! Tagged values flowing between ports
//!
//! Every value on a port is a [`DataValue`]: a scalar of one of the
//! [`ScalarType`] kinds, an array of one kind, a lazily evaluated
//! function value (`fn<T>`), or the `control-flow-excluded` sentinel that
//! marks a port no value reached.
//!
//! The JSON form of a value is `{"type": "<data type>", "value": <payload>}`.
//! Raw bytes serialize as `{"$bytes": "<base64>"}` wherever they occur so that
//! generic JSON walkers (the recorder's asset dedup) can find them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Marker key used for base64 encoded byte payloads in JSON
pub const BYTES_KEY: &str = "$bytes";

/// Reason carried by the exclusions emitted from loops that ran out of iterations
pub const LOOP_NOT_BROKEN: &str = "loop-not-broken";

/// The scalar kinds a value or port can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Any,
    String,
    Number,
    Boolean,
    Date,
    Time,
    DateTime,
    ChatMessage,
    Object,
    GptFunction,
    Vector,
    Image,
    Binary,
    Audio,
    Document,
    GraphReference,
    ControlFlowExcluded,
}

impl ScalarType {
    const ALL: [ScalarType; 17] = [
        ScalarType::Any,
        ScalarType::String,
        ScalarType::Number,
        ScalarType::Boolean,
        ScalarType::Date,
        ScalarType::Time,
        ScalarType::DateTime,
        ScalarType::ChatMessage,
        ScalarType::Object,
        ScalarType::GptFunction,
        ScalarType::Vector,
        ScalarType::Image,
        ScalarType::Binary,
        ScalarType::Audio,
        ScalarType::Document,
        ScalarType::GraphReference,
        ScalarType::ControlFlowExcluded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Any => "any",
            ScalarType::String => "string",
            ScalarType::Number => "number",
            ScalarType::Boolean => "boolean",
            ScalarType::Date => "date",
            ScalarType::Time => "time",
            ScalarType::DateTime => "datetime",
            ScalarType::ChatMessage => "chat-message",
            ScalarType::Object => "object",
            ScalarType::GptFunction => "gpt-function",
            ScalarType::Vector => "vector",
            ScalarType::Image => "image",
            ScalarType::Binary => "binary",
            ScalarType::Audio => "audio",
            ScalarType::Document => "document",
            ScalarType::GraphReference => "graph-reference",
            ScalarType::ControlFlowExcluded => "control-flow-excluded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// The value a port of this kind holds when nothing has been provided
    pub fn default_value(&self) -> DataValue {
        match self {
            ScalarType::Any | ScalarType::Object => DataValue::Object(serde_json::json!({})),
            ScalarType::String => DataValue::String(String::new()),
            ScalarType::Number => DataValue::Number(0.0),
            ScalarType::Boolean => DataValue::Boolean(false),
            ScalarType::Date => DataValue::Date(String::new()),
            ScalarType::Time => DataValue::Time(String::new()),
            ScalarType::DateTime => DataValue::DateTime(String::new()),
            ScalarType::ChatMessage => DataValue::ChatMessage(ChatMessage::user("")),
            ScalarType::GptFunction => DataValue::GptFunction(GptFunction::default()),
            ScalarType::Vector => DataValue::Vector(Vec::new()),
            ScalarType::Image => DataValue::Image(MediaData::default()),
            ScalarType::Binary => DataValue::Binary(Blob::default()),
            ScalarType::Audio => DataValue::Audio(MediaData::default()),
            ScalarType::Document => DataValue::Document(Document::default()),
            ScalarType::GraphReference => DataValue::GraphReference(GraphReference::default()),
            ScalarType::ControlFlowExcluded => DataValue::excluded(),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full data type of a port or value: scalar kind, array form and laziness
///
/// Formats as `string`, `string[]`, `fn<string>` or `fn<string[]>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub scalar: ScalarType,
    pub array: bool,
    pub lazy: bool,
}

impl DataType {
    pub const ANY: DataType = DataType::scalar(ScalarType::Any);
    pub const STRING: DataType = DataType::scalar(ScalarType::String);
    pub const NUMBER: DataType = DataType::scalar(ScalarType::Number);
    pub const BOOLEAN: DataType = DataType::scalar(ScalarType::Boolean);
    pub const OBJECT: DataType = DataType::scalar(ScalarType::Object);

    pub const fn scalar(scalar: ScalarType) -> Self {
        Self {
            scalar,
            array: false,
            lazy: false,
        }
    }

    pub const fn array_of(scalar: ScalarType) -> Self {
        Self {
            scalar,
            array: true,
            lazy: false,
        }
    }

    /// The `fn<...>` form of this type
    pub const fn lazy(self) -> Self {
        Self { lazy: true, ..self }
    }

    /// This type with laziness stripped
    pub const fn evaluated(self) -> Self {
        Self { lazy: false, ..self }
    }

    /// The array form of this type
    pub const fn to_array(self) -> Self {
        Self {
            array: true,
            lazy: false,
            scalar: self.scalar,
        }
    }

    /// The element type of an array type
    pub const fn element(self) -> Self {
        Self::scalar(self.scalar)
    }

    pub fn is_any(&self) -> bool {
        self.scalar == ScalarType::Any && !self.array
    }

    /// Whether a value of type `value_type` can be handed to a port of this
    /// type without coercion
    pub fn accepts(&self, value_type: &DataType) -> bool {
        if self.is_any() || value_type.is_any() {
            return true;
        }
        let target = self.evaluated();
        let actual = value_type.evaluated();
        if target == actual {
            return true;
        }
        // any[] holds anything array-shaped
        target.array && actual.array && target.scalar == ScalarType::Any
    }

    pub fn default_value(&self) -> DataValue {
        if self.array {
            DataValue::array(self.scalar, Vec::new())
        } else {
            self.scalar.default_value()
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.array { "[]" } else { "" };
        if self.lazy {
            write!(f, "fn<{}{}>", self.scalar, suffix)
        } else {
            write!(f, "{}{}", self.scalar, suffix)
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (inner, lazy) = match s.strip_prefix("fn<").and_then(|r| r.strip_suffix('>')) {
            Some(inner) => (inner, true),
            None => (s, false),
        };
        let (scalar, array) = match inner.strip_suffix("[]") {
            Some(scalar) => (scalar, true),
            None => (inner, false),
        };
        let scalar = ScalarType::parse(scalar).ok_or_else(|| format!("unknown data type '{}'", s))?;
        Ok(Self {
            scalar,
            array,
            lazy,
        })
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Raw bytes, serialized as `{"$bytes": "<base64>"}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> std::result::Result<Self, base64::DecodeError> {
        BASE64.decode(encoded).map(Blob)
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(BYTES_KEY, &self.to_base64())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Encoded {
            #[serde(rename = "$bytes")]
            bytes: String,
        }
        let encoded = Encoded::deserialize(deserializer)?;
        Blob::from_base64(&encoded.bytes).map_err(de::Error::custom)
    }
}

/// Role of a chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub role: ChatRole,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            message: message.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GptFunction {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Image or audio payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaData {
    #[serde(default)]
    pub mime_type: String,
    pub data: Blob,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Reference to a graph that can be called like a function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphReference {
    pub graph_id: String,
    #[serde(default)]
    pub graph_name: String,
}

/// Homogeneous array of values
///
/// Items of an `any[]` array are always [`DataValue::Any`]; typed arrays hold
/// items of their element kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub item_type: ScalarType,
    pub items: Vec<DataValue>,
}

type Thunk = dyn Fn() -> DataValue + Send + Sync;

/// A deferred value evaluated at read time (`fn<T>`)
#[derive(Clone)]
pub struct LazyValue {
    data_type: DataType,
    thunk: Arc<Thunk>,
}

impl LazyValue {
    pub fn new<F>(data_type: DataType, thunk: F) -> Self
    where
        F: Fn() -> DataValue + Send + Sync + 'static,
    {
        Self {
            data_type: data_type.evaluated(),
            thunk: Arc::new(thunk),
        }
    }

    /// A lazy value that always yields the same value
    pub fn constant(value: DataValue) -> Self {
        let data_type = value.data_type().evaluated();
        Self::new(data_type, move || value.clone())
    }

    /// Type of the value produced by evaluation
    pub fn output_type(&self) -> DataType {
        self.data_type
    }

    pub fn evaluate(&self) -> DataValue {
        (self.thunk)()
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyValue")
            .field("data_type", &self.data_type.to_string())
            .finish_non_exhaustive()
    }
}

impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        self.data_type == other.data_type && self.evaluate() == other.evaluate()
    }
}

/// A value flowing on a port
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Any(serde_json::Value),
    String(String),
    Number(f64),
    Boolean(bool),
    Date(String),
    Time(String),
    DateTime(String),
    ChatMessage(ChatMessage),
    Object(serde_json::Value),
    GptFunction(GptFunction),
    Vector(Vec<f64>),
    Image(MediaData),
    Binary(Blob),
    Audio(MediaData),
    Document(Document),
    GraphReference(GraphReference),
    /// No value reached this port; the optional reason is informational
    ControlFlowExcluded(Option<String>),
    Array(ArrayValue),
    Function(LazyValue),
}

impl DataValue {
    pub fn string(s: impl Into<String>) -> Self {
        DataValue::String(s.into())
    }

    pub fn excluded() -> Self {
        DataValue::ControlFlowExcluded(None)
    }

    pub fn excluded_because(reason: impl Into<String>) -> Self {
        DataValue::ControlFlowExcluded(Some(reason.into()))
    }

    /// Build an array value, normalising items of `any[]` arrays
    pub fn array(item_type: ScalarType, items: Vec<DataValue>) -> Self {
        let items = if item_type == ScalarType::Any {
            items
                .into_iter()
                .map(|item| match item {
                    DataValue::Any(v) => DataValue::Any(v),
                    other => DataValue::Any(other.payload_json()),
                })
                .collect()
        } else {
            items
        };
        DataValue::Array(ArrayValue { item_type, items })
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::array(
            ScalarType::String,
            items.into_iter().map(|s| DataValue::String(s.into())).collect(),
        )
    }

    /// A deferred value of the given (non-lazy) type
    pub fn lazy<F>(data_type: DataType, thunk: F) -> Self
    where
        F: Fn() -> DataValue + Send + Sync + 'static,
    {
        DataValue::Function(LazyValue::new(data_type, thunk))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::Any(_) => DataType::ANY,
            DataValue::String(_) => DataType::STRING,
            DataValue::Number(_) => DataType::NUMBER,
            DataValue::Boolean(_) => DataType::BOOLEAN,
            DataValue::Date(_) => DataType::scalar(ScalarType::Date),
            DataValue::Time(_) => DataType::scalar(ScalarType::Time),
            DataValue::DateTime(_) => DataType::scalar(ScalarType::DateTime),
            DataValue::ChatMessage(_) => DataType::scalar(ScalarType::ChatMessage),
            DataValue::Object(_) => DataType::OBJECT,
            DataValue::GptFunction(_) => DataType::scalar(ScalarType::GptFunction),
            DataValue::Vector(_) => DataType::scalar(ScalarType::Vector),
            DataValue::Image(_) => DataType::scalar(ScalarType::Image),
            DataValue::Binary(_) => DataType::scalar(ScalarType::Binary),
            DataValue::Audio(_) => DataType::scalar(ScalarType::Audio),
            DataValue::Document(_) => DataType::scalar(ScalarType::Document),
            DataValue::GraphReference(_) => DataType::scalar(ScalarType::GraphReference),
            DataValue::ControlFlowExcluded(_) => DataType::scalar(ScalarType::ControlFlowExcluded),
            DataValue::Array(array) => DataType::array_of(array.item_type),
            DataValue::Function(lazy) => lazy.output_type().lazy(),
        }
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, DataValue::ControlFlowExcluded(_))
    }

    pub fn is_array(&self) -> bool {
        match self {
            DataValue::Array(_) => true,
            DataValue::Function(lazy) => lazy.output_type().array,
            _ => false,
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, DataValue::Function(_))
    }

    /// Evaluate a `fn<T>` value (recursively); other values are returned as is
    pub fn unwrap_lazy(self) -> DataValue {
        match self {
            DataValue::Function(lazy) => lazy.evaluate().unwrap_lazy(),
            other => other,
        }
    }

    /// Per-element values of an array, or `None` for non-arrays
    pub fn arrayize(&self) -> Option<Vec<DataValue>> {
        match self {
            DataValue::Array(array) => Some(array.items.clone()),
            DataValue::Function(lazy) if lazy.output_type().array => lazy.evaluate().arrayize(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::DateTime(s) => {
                Some(s)
            }
            DataValue::Any(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            DataValue::Any(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Boolean(b) => Some(*b),
            DataValue::Any(v) => v.as_bool(),
            _ => None,
        }
    }

    /// The untagged JSON payload (the `value` half of the tagged form)
    pub fn payload_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            DataValue::Any(v) | DataValue::Object(v) => v.clone(),
            DataValue::String(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::DateTime(s) => {
                Value::String(s.clone())
            }
            DataValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DataValue::Boolean(b) => Value::Bool(*b),
            DataValue::ChatMessage(m) => to_json(m),
            DataValue::GptFunction(f) => to_json(f),
            DataValue::Vector(v) => to_json(v),
            DataValue::Image(m) | DataValue::Audio(m) => to_json(m),
            DataValue::Binary(b) => to_json(b),
            DataValue::Document(d) => to_json(d),
            DataValue::GraphReference(r) => to_json(r),
            DataValue::ControlFlowExcluded(reason) => reason
                .as_ref()
                .map(|r| Value::String(r.clone()))
                .unwrap_or(Value::Null),
            DataValue::Array(array) => {
                Value::Array(array.items.iter().map(DataValue::payload_json).collect())
            }
            DataValue::Function(lazy) => lazy.evaluate().payload_json(),
        }
    }

    /// Rebuild a value of the given type from its untagged JSON payload
    pub fn from_payload(data_type: DataType, payload: serde_json::Value) -> Result<Self, String> {
        if data_type.lazy {
            let value = Self::from_payload(data_type.evaluated(), payload)?;
            return Ok(DataValue::Function(LazyValue::new(data_type, move || value.clone())));
        }
        if data_type.array {
            let serde_json::Value::Array(items) = payload else {
                return Err(format!("expected an array payload for {}", data_type));
            };
            let items = items
                .into_iter()
                .map(|item| scalar_from_payload(data_type.scalar, item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(DataValue::Array(ArrayValue {
                item_type: data_type.scalar,
                items,
            }));
        }
        scalar_from_payload(data_type.scalar, payload)
    }
}

fn scalar_from_payload(scalar: ScalarType, payload: serde_json::Value) -> Result<DataValue, String> {
    use serde_json::Value;
    fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, String> {
        serde_json::from_value(payload).map_err(|e| e.to_string())
    }
    let text = |payload: Value| match payload {
        Value::String(s) => Ok(s),
        other => Err(format!("expected a string payload, got {}", other)),
    };
    Ok(match scalar {
        ScalarType::Any => DataValue::Any(payload),
        ScalarType::Object => DataValue::Object(payload),
        ScalarType::String => DataValue::String(text(payload)?),
        ScalarType::Date => DataValue::Date(text(payload)?),
        ScalarType::Time => DataValue::Time(text(payload)?),
        ScalarType::DateTime => DataValue::DateTime(text(payload)?),
        ScalarType::Number => match payload {
            // non-finite numbers have no JSON form
            Value::Null => DataValue::Number(f64::NAN),
            other => DataValue::Number(parse(other)?),
        },
        ScalarType::Boolean => DataValue::Boolean(parse(payload)?),
        ScalarType::ChatMessage => DataValue::ChatMessage(parse(payload)?),
        ScalarType::GptFunction => DataValue::GptFunction(parse(payload)?),
        ScalarType::Vector => DataValue::Vector(parse(payload)?),
        ScalarType::Image => DataValue::Image(parse(payload)?),
        ScalarType::Binary => DataValue::Binary(parse(payload)?),
        ScalarType::Audio => DataValue::Audio(parse(payload)?),
        ScalarType::Document => DataValue::Document(parse(payload)?),
        ScalarType::GraphReference => DataValue::GraphReference(parse(payload)?),
        ScalarType::ControlFlowExcluded => match payload {
            Value::String(reason) => DataValue::ControlFlowExcluded(Some(reason)),
            _ => DataValue::ControlFlowExcluded(None),
        },
    })
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", &self.data_type())?;
        map.serialize_entry("value", &self.payload_json())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Tagged {
            #[serde(rename = "type")]
            data_type: DataType,
            #[serde(default)]
            value: serde_json::Value,
        }
        let tagged = Tagged::deserialize(deserializer)?;
        DataValue::from_payload(tagged.data_type, tagged.value).map_err(de::Error::custom)
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

impl From<f64> for DataValue {
    fn from(n: f64) -> Self {
        DataValue::Number(n)
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_type_parse_and_format() {
        for s in ["string", "number[]", "fn<boolean>", "fn<chat-message[]>", "control-flow-excluded"] {
            let parsed: DataType = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("strin".parse::<DataType>().is_err());

        let t: DataType = "fn<string[]>".parse().unwrap();
        assert!(t.lazy && t.array);
        assert_eq!(t.scalar, ScalarType::String);
    }

    #[test]
    fn test_accepts() {
        assert!(DataType::ANY.accepts(&DataType::NUMBER));
        assert!(DataType::STRING.accepts(&DataType::STRING.lazy()));
        assert!(DataType::array_of(ScalarType::Any).accepts(&DataType::array_of(ScalarType::Number)));
        assert!(!DataType::STRING.accepts(&DataType::NUMBER));
        assert!(!DataType::STRING.accepts(&DataType::array_of(ScalarType::String)));
    }

    #[test]
    fn test_tagged_json_form() {
        let value = DataValue::strings(["a", "b"]);
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"type": "string[]", "value": ["a", "b"]}));

        let decoded: DataValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_binary_uses_bytes_marker() {
        let value = DataValue::Binary(Blob(vec![0, 1, 2, 255]));
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"type": "binary", "value": {"$bytes": "AAEC/w=="}}));

        let decoded: DataValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_lazy_value_reads_at_call_time() {
        let cell = Arc::new(parking_lot::Mutex::new(1.0));
        let source = cell.clone();
        let value = DataValue::lazy(DataType::NUMBER, move || DataValue::Number(*source.lock()));

        assert_eq!(value.data_type().to_string(), "fn<number>");
        *cell.lock() = 5.0;
        assert_eq!(value.unwrap_lazy(), DataValue::Number(5.0));
    }

    #[test]
    fn test_lazy_value_serializes_snapshot() {
        let value = DataValue::lazy(DataType::STRING, || DataValue::string("now"));
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"type": "fn<string>", "value": "now"}));

        let decoded: DataValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_any_array_normalises_items() {
        let value = DataValue::array(
            ScalarType::Any,
            vec![DataValue::Number(1.0), DataValue::string("x")],
        );
        let DataValue::Array(array) = &value else {
            panic!("expected array");
        };
        assert_eq!(array.items, vec![DataValue::Any(json!(1.0)), DataValue::Any(json!("x"))]);
    }

    #[test]
    fn test_excluded_reason_round_trip() {
        let value = DataValue::excluded_because(LOOP_NOT_BROKEN);
        let decoded: DataValue = serde_json::from_value(serde_json::to_value(&value).unwrap()).unwrap();
        assert_eq!(decoded, value);
        assert!(decoded.is_excluded());
    }

    #[test]
    fn test_arrayize() {
        let value = DataValue::strings(["a", "b", "c"]);
        assert_eq!(value.arrayize().map(|items| items.len()), Some(3));
        assert!(DataValue::string("a").arrayize().is_none());
    }
}
