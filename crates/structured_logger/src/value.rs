//! The dynamic value model accepted by the logging methods.
//!
//! Application code hands the logger arbitrary values: strings, numbers, structured objects,
//! errors, binary buffers and so on. [`LogValue`] is the closed set of shapes the normalizer and
//! the serializer understand. Values are plain trees, except for [`SharedValue`] nodes which carry
//! an identity and can therefore appear several times in a graph, or even contain themselves.

use std::{
    error::Error as StdError,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use indexmap::IndexMap;
use time::OffsetDateTime;

use crate::timestamp;

/// An insertion-ordered, string-keyed object.
pub type Object = IndexMap<String, LogValue>;

/// A value that can be passed to the logger.
#[derive(Clone, Debug, Default)]
pub enum LogValue {
    /// An absent value. Dropped from objects when serialized.
    #[default]
    Undefined,

    /// An explicit null.
    Null,

    /// A boolean.
    Bool(bool),

    /// A signed integer.
    Int(i64),

    /// An unsigned integer.
    UInt(u64),

    /// A floating point number.
    Float(f64),

    /// An integer too large to be represented exactly as a JSON number. Serialized as a decimal
    /// string.
    BigInt(i128),

    /// A string.
    String(String),

    /// A binary buffer.
    Bytes(Vec<u8>),

    /// A point in time.
    Date(OffsetDateTime),

    /// A regular expression literal.
    RegExp(RegExpValue),

    /// An ordered sequence.
    Array(Vec<LogValue>),

    /// A set, in insertion order.
    Set(Vec<LogValue>),

    /// A map with arbitrary keys, in insertion order.
    Map(Vec<(LogValue, LogValue)>),

    /// A string-keyed object.
    Object(Object),

    /// An error.
    Error(ErrorValue),

    /// An application object exposing serialization hooks.
    Custom(Arc<dyn ValueHooks>),

    /// An application object exposing an iteration protocol.
    Iterable(Arc<dyn IterableValue>),

    /// A node with identity, see [`SharedValue`].
    Shared(SharedValue),
}

/// Serialization hooks for application objects.
///
/// [`ValueHooks::to_json`] takes precedence over [`ValueHooks::inspect`]. An object returning
/// `None` from both serializes as `null`.
pub trait ValueHooks: fmt::Debug + Send + Sync {
    /// Returns the value to serialize in place of this object. `key` is the key or index the
    /// object is stored under, or the empty string at the top level.
    fn to_json(&self, key: &str) -> Option<LogValue> {
        let _ = key;
        None
    }

    /// Returns a representation of this object meant for inspection.
    fn inspect(&self) -> Option<LogValue> {
        None
    }
}

/// An application object that can be iterated, serialized as an array of its items.
pub trait IterableValue: fmt::Debug + Send + Sync {
    /// Materializes the items of the object.
    fn values(&self) -> Vec<LogValue>;
}

/// A regular expression, kept as its source and flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegExpValue {
    /// The pattern source, without delimiters.
    pub source: String,

    /// The flags, in canonical order.
    pub flags: String,
}

impl RegExpValue {
    const FLAG_ORDER: &'static str = "dgimsuvy";

    /// Creates a regular expression value. Flags are de-duplicated and put in canonical order, so
    /// `"ig"` becomes `"gi"`.
    pub fn new(source: impl Into<String>, flags: &str) -> Self {
        Self {
            source: source.into(),
            flags: Self::FLAG_ORDER
                .chars()
                .filter(|flag| flags.contains(*flag))
                .collect(),
        }
    }
}

impl fmt::Display for RegExpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

/// A structured error.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorValue {
    /// The error name, e.g. `TypeError`. The generic name is `Error`.
    pub name: String,

    /// The concrete type of the error, used in place of a generic `Error` name.
    pub type_name: Option<String>,

    /// The error message.
    pub message: String,

    /// The stack trace, including the leading `Name: message` line.
    pub stack: Option<String>,

    /// Any other properties carried by the error, e.g. `code` or `cause`.
    pub props: Object,
}

impl ErrorValue {
    /// The name of errors without a more specific one.
    pub const GENERIC_NAME: &'static str = "Error";

    /// Creates a generic error with the given message and no stack.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: Self::GENERIC_NAME.to_string(),
            type_name: None,
            message: message.into(),
            stack: None,
            props: Object::new(),
        }
    }

    /// Converts a Rust error. The name is the unqualified type name of `E` and the chain of
    /// [`source`](StdError::source)s is kept as nested `cause` properties.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        let mut value = Self::from_source(error);
        value.name = short_type_name(std::any::type_name::<E>());
        value
    }

    fn from_source(error: &(impl StdError + ?Sized)) -> Self {
        let mut value = Self::new(error.to_string());
        if let Some(source) = error.source() {
            value.props.insert(
                "cause".to_string(),
                LogValue::Error(Self::from_source(source)),
            );
        }
        value
    }

    /// Sets the error name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the concrete type name.
    #[must_use]
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Sets the stack trace.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Adds a custom property.
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<LogValue>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// The name to report: the type name when the error only has the generic name.
    pub fn display_name(&self) -> &str {
        match &self.type_name {
            Some(type_name) if self.name == Self::GENERIC_NAME => type_name,
            _ => &self.name,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.display_name())
        } else {
            write!(f, "{}: {}", self.display_name(), self.message)
        }
    }
}

fn short_type_name(full: &str) -> String {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .trim_start_matches("dyn ")
        .to_string()
}

/// A reference-counted value node with identity.
///
/// Cloning a [`SharedValue`] yields another handle to the same node. Holding the same node in
/// two places of a value serializes it twice; a node that contains itself serializes as
/// `"[Circular]"` at the point of re-entry.
///
/// A node that transitively contains itself is never freed. Replace its contents with
/// [`SharedValue::set`] to break the cycle once it is no longer needed.
#[derive(Clone)]
pub struct SharedValue(Arc<RwLock<LogValue>>);

impl SharedValue {
    /// Creates a node holding `value`.
    pub fn new(value: impl Into<LogValue>) -> Self {
        Self(Arc::new(RwLock::new(value.into())))
    }

    /// Returns a copy of the node's contents. Nested shared nodes are copied as handles.
    pub fn get(&self) -> LogValue {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the node's contents.
    pub fn set(&self, value: impl Into<LogValue>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value.into();
    }

    /// Whether both handles point to the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents are not printed, they may contain this node.
        write!(f, "SharedValue({:p})", self.identity())
    }
}

impl LogValue {
    /// Builds an object from key/value pairs.
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Builds an array.
    pub fn array<V: Into<Self>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// Builds a set. Duplicates are kept as given.
    pub fn set<V: Into<Self>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::Set(items.into_iter().map(Into::into).collect())
    }

    /// Builds a map with arbitrary keys.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Self>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Builds a binary buffer.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Builds a regular expression.
    pub fn regexp(source: impl Into<String>, flags: &str) -> Self {
        Self::RegExp(RegExpValue::new(source, flags))
    }

    /// Wraps an application object exposing serialization hooks.
    pub fn custom(hooks: impl ValueHooks + 'static) -> Self {
        Self::Custom(Arc::new(hooks))
    }

    /// Wraps an application object exposing an iteration protocol.
    pub fn iterable(iterable: impl IterableValue + 'static) -> Self {
        Self::Iterable(Arc::new(iterable))
    }

    /// Converts a Rust error, see [`ErrorValue::from_error`].
    pub fn error<E: StdError + ?Sized>(error: &E) -> Self {
        Self::Error(ErrorValue::from_error(error))
    }

    /// Returns the string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value is a primitive rather than an object. Dates and regular expressions count
    /// as objects here, although they have an inline string form.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Undefined
                | Self::Null
                | Self::Bool(_)
                | Self::Int(_)
                | Self::UInt(_)
                | Self::Float(_)
                | Self::BigInt(_)
                | Self::String(_)
        )
    }

    /// Looks up a property by key. Errors expose `name`, `message` and `stack` besides their
    /// custom properties, shared nodes are looked through.
    pub fn property(&self, key: &str) -> Option<Self> {
        match self {
            Self::Object(object) => object.get(key).cloned(),
            Self::Error(error) => match key {
                "name" => Some(Self::String(error.name.clone())),
                "message" => Some(Self::String(error.message.clone())),
                "stack" => error.stack.clone().map(Self::String),
                _ => error.props.get(key).cloned(),
            },
            Self::Shared(shared) => shared.get().property(key),
            _ => None,
        }
    }

    /// Whether [`LogValue::property`] finds `key`.
    pub fn has_property(&self, key: &str) -> bool {
        self.property(key).is_some()
    }

    /// The inline string form used when concatenating log arguments: primitives in their literal
    /// form, dates as ISO-8601 and regular expressions as `/source/flags`. Other values use
    /// [`LogValue::inspect`].
    pub fn stringify(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::UInt(u) => u.to_string(),
            Self::Float(f) => format_float(*f),
            Self::BigInt(i) => i.to_string(),
            Self::String(s) => s.clone(),
            Self::Date(date) => timestamp::to_iso_millis(*date),
            Self::RegExp(regexp) => regexp.to_string(),
            _ => self.inspect(),
        }
    }

    /// A generic single-line rendering of any value: strings as-is, other primitives as in
    /// [`LogValue::stringify`], errors as `Name: message`, everything else as compact JSON.
    pub fn inspect(&self) -> String {
        match self {
            Self::Error(error) => error.to_string(),
            Self::Shared(shared) if matches!(shared.get(), Self::Error(_)) => shared.get().inspect(),
            value if value.is_primitive() => value.stringify(),
            Self::Date(_) | Self::RegExp(_) => self.stringify(),
            value => crate::serialize::to_json(value).to_string(),
        }
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if value == 0.0 {
        "0".to_string()
    } else {
        value.to_string()
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl PartialEq for LogValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::RegExp(a), Self::RegExp(b)) => a == b,
            (Self::Array(a), Self::Array(b)) | (Self::Set(a), Self::Set(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            (Self::Iterable(a), Self::Iterable(b)) => Arc::ptr_eq(a, b),
            (Self::Shared(a), Self::Shared(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

macro_rules! impl_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for LogValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

impl_from!(Bool: bool);
impl_from!(Int: i8, i16, i32, i64);
impl_from!(UInt: u8, u16, u32, u64);
impl_from!(Float: f32, f64);
impl_from!(BigInt: i128);
impl_from!(String: String, &str, &String, Box<str>);
impl_from!(Date: OffsetDateTime);
impl_from!(RegExp: RegExpValue);
impl_from!(Object: Object);
impl_from!(Error: ErrorValue);
impl_from!(Shared: SharedValue);

impl From<usize> for LogValue {
    fn from(value: usize) -> Self {
        u64::try_from(value).map_or_else(|_| Self::BigInt(i128::MAX), Self::UInt)
    }
}

impl From<u128> for LogValue {
    fn from(value: u128) -> Self {
        u64::try_from(value).map_or_else(
            |_| i128::try_from(value).map_or(Self::BigInt(i128::MAX), Self::BigInt),
            Self::UInt,
        )
    }
}

impl<T: Into<Self>> From<Option<T>> for LogValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for LogValue {
    fn from(value: Vec<T>) -> Self {
        Self::array(value)
    }
}

impl From<serde_json::Value> for LogValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .or_else(|| number.as_u64().map(Self::UInt))
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::array(items),
            Value::Object(map) => Self::object(map),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct OuterError(#[source] std::io::Error);

    #[test]
    fn stringifies_scalars_inline() {
        let values = [
            LogValue::from("hello"),
            LogValue::from(datetime!(2024-12-02 12:23:11.843 UTC)),
            LogValue::from(1),
            LogValue::from(false),
            LogValue::from(0.0),
            LogValue::from(1.2),
            LogValue::regexp("b\\\\o\\n(o\\))", "ig"),
            LogValue::Undefined,
            LogValue::Null,
            LogValue::from(123_432_432_432_423_432_423_i128),
            LogValue::from(f64::NEG_INFINITY),
        ];
        let rendered: Vec<String> = values.iter().map(LogValue::stringify).collect();
        assert_eq!(
            rendered.join(" "),
            "hello 2024-12-02T12:23:11.843Z 1 false 0 1.2 /b\\\\o\\n(o\\))/gi undefined null \
             123432432432423432423 -Infinity"
        );
    }

    #[test]
    fn canonicalizes_regexp_flags() {
        assert_eq!(RegExpValue::new("a", "mig").flags, "gim");
        assert_eq!(RegExpValue::new("a", "yy").flags, "y");
    }

    #[test]
    fn converts_std_errors_with_causes() {
        let error = OuterError(std::io::Error::other("disk full"));
        let value = ErrorValue::from_error(&error);

        assert_eq!(value.name, "OuterError");
        assert_eq!(value.message, "outer failure");
        assert_eq!(value.stack, None);
        assert_eq!(
            value.props.get("cause"),
            Some(&LogValue::Error(ErrorValue::new("disk full")))
        );
    }

    #[test]
    fn uses_type_name_for_generic_errors() {
        let error = ErrorValue::new("boom").with_type_name("CustomError");
        assert_eq!(error.display_name(), "CustomError");
        assert_eq!(error.to_string(), "CustomError: boom");

        let named = ErrorValue::new("boom")
            .with_name("TypeError")
            .with_type_name("CustomError");
        assert_eq!(named.display_name(), "TypeError");
    }

    #[test]
    fn looks_up_properties_through_shared_nodes() {
        let shared = SharedValue::new(LogValue::object([("message", "hi")]));
        let value = LogValue::from(shared);

        assert!(value.has_property("message"));
        assert!(!value.has_property("other"));
        assert!(LogValue::Error(ErrorValue::new("")).has_property("message"));
    }

    #[test]
    fn converts_json_values() {
        let value = LogValue::from(serde_json::json!({ "a": [1, -2, 1.5, null], "b": "c" }));
        assert_eq!(
            value,
            LogValue::object([
                (
                    "a",
                    LogValue::array([
                        LogValue::Int(1),
                        LogValue::Int(-2),
                        LogValue::Float(1.5),
                        LogValue::Null,
                    ])
                ),
                ("b", LogValue::from("c")),
            ])
        );
    }

    #[test]
    fn shared_values_compare_by_identity() {
        let a = SharedValue::new(1);
        let b = SharedValue::new(1);
        assert_eq!(LogValue::from(a.clone()), LogValue::from(a));
        assert_ne!(LogValue::from(b), LogValue::from(SharedValue::new(1)));
    }
}
