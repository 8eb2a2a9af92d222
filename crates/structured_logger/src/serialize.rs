//! Conversion of [`LogValue`]s into JSON-safe [`serde_json::Value`]s.
//!
//! The conversion is an ordered chain of rules, the first rule that handles a value wins. Shared
//! nodes, custom values and iterables that are re-entered while they are being serialized are
//! replaced with `"[Circular]"`; nodes that merely occur more than once are serialized in full
//! every time.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashSet;
use serde_json::{json, Map, Number, Value};

use crate::{
    timestamp,
    value::LogValue,
};

/// Replacement for a node that contains itself.
pub const CIRCULAR: &str = "[Circular]";

type Rule = fn(&mut Serializer, &LogValue, &str) -> Option<Value>;

/// Rules in order of precedence.
const RULES: &[(&str, Rule)] = &[
    ("bytes", Serializer::bytes),
    ("regexp", Serializer::regexp),
    ("date", Serializer::date),
    ("bigint", Serializer::bigint),
    ("to_json", Serializer::to_json_hook),
    ("inspect", Serializer::inspect_hook),
    ("shared", Serializer::shared),
    ("set", Serializer::set),
    ("map", Serializer::map),
    ("array", Serializer::array),
    ("iterable", Serializer::iterable),
    ("error", Serializer::error),
    ("object", Serializer::object),
    ("primitive", Serializer::primitive),
];

/// Serializes a value into JSON.
///
/// This never fails: values without a JSON counterpart become `null`.
pub fn to_json(value: &LogValue) -> Value {
    Serializer::default().convert(value, "")
}

/// Serializes the entries of an object, dropping `Undefined` values.
pub fn object_to_json<'a>(
    entries: impl IntoIterator<Item = (&'a String, &'a LogValue)>,
) -> Map<String, Value> {
    Serializer::default().entries(entries)
}

#[derive(Default)]
struct Serializer {
    /// Identities of the shared, custom and iterable nodes on the current path.
    visiting: FxHashSet<*const ()>,
}

impl Serializer {
    fn convert(&mut self, value: &LogValue, parent_key: &str) -> Value {
        RULES
            .iter()
            .find_map(|(_, rule)| rule(self, value, parent_key))
            .unwrap_or(Value::Null)
    }

    fn entries<'a>(
        &mut self,
        entries: impl IntoIterator<Item = (&'a String, &'a LogValue)>,
    ) -> Map<String, Value> {
        entries
            .into_iter()
            .filter(|(_, value)| !matches!(value, LogValue::Undefined))
            .map(|(key, value)| (key.clone(), self.convert(value, key)))
            .collect()
    }

    fn items<'a>(&mut self, items: impl IntoIterator<Item = &'a LogValue>) -> Value {
        Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| self.convert(item, &index.to_string()))
                .collect(),
        )
    }

    fn bytes(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::Bytes(bytes) = value else {
            return None;
        };
        Some(json!({
            "@type": "Buffer",
            "length": bytes.len(),
            "base64": STANDARD.encode(bytes),
        }))
    }

    fn regexp(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::RegExp(regexp) = value else {
            return None;
        };
        Some(json!({
            "@type": "RegExp",
            "source": regexp.source,
            "flags": regexp.flags,
        }))
    }

    fn date(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::Date(date) = value else {
            return None;
        };
        Some(Value::String(timestamp::to_iso_millis(*date)))
    }

    fn bigint(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::BigInt(big) = value else {
            return None;
        };
        Some(Value::String(big.to_string()))
    }

    fn to_json_hook(&mut self, value: &LogValue, parent_key: &str) -> Option<Value> {
        let LogValue::Custom(hooks) = value else {
            return None;
        };
        let replacement = hooks.to_json(parent_key)?;
        Some(self.visit(Arc::as_ptr(hooks).cast(), |this| {
            this.convert(&replacement, parent_key)
        }))
    }

    fn inspect_hook(&mut self, value: &LogValue, parent_key: &str) -> Option<Value> {
        let LogValue::Custom(hooks) = value else {
            return None;
        };
        let replacement = hooks.inspect()?;
        Some(self.visit(Arc::as_ptr(hooks).cast(), |this| {
            this.convert(&replacement, parent_key)
        }))
    }

    fn shared(&mut self, value: &LogValue, parent_key: &str) -> Option<Value> {
        let LogValue::Shared(shared) = value else {
            return None;
        };
        Some(self.visit(shared.identity(), |this| {
            // Copied out so that no lock is held while recursing.
            this.convert(&shared.get(), parent_key)
        }))
    }

    /// Converts the contents of a node, or returns [`CIRCULAR`] when the node is already on the
    /// current path.
    fn visit(&mut self, identity: *const (), convert: impl FnOnce(&mut Self) -> Value) -> Value {
        if !self.visiting.insert(identity) {
            return Value::String(CIRCULAR.to_string());
        }
        let converted = convert(self);
        self.visiting.remove(&identity);
        converted
    }

    fn set(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::Set(items) = value else {
            return None;
        };
        Some(self.items(items))
    }

    fn map(&mut self, value: &LogValue, parent_key: &str) -> Option<Value> {
        let LogValue::Map(entries) = value else {
            return None;
        };
        Some(Value::Array(
            entries
                .iter()
                .map(|(key, value)| {
                    json!({
                        "key": self.convert(key, parent_key),
                        "value": self.convert(value, &key.stringify()),
                    })
                })
                .collect(),
        ))
    }

    fn array(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::Array(items) = value else {
            return None;
        };
        Some(self.items(items))
    }

    fn iterable(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::Iterable(iterable) = value else {
            return None;
        };
        Some(self.visit(Arc::as_ptr(iterable).cast(), |this| {
            this.items(&iterable.values())
        }))
    }

    fn error(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::Error(error) = value else {
            return None;
        };
        let mut object = self.entries(&error.props);
        object.insert(
            "name".to_string(),
            Value::String(error.display_name().to_string()),
        );
        if let Some(stack) = &error.stack {
            object.insert("stack".to_string(), Value::String(stack.clone()));
        }
        object.insert("message".to_string(), Value::String(error.message.clone()));
        Some(Value::Object(object))
    }

    fn object(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        let LogValue::Object(object) = value else {
            return None;
        };
        Some(Value::Object(self.entries(object)))
    }

    fn primitive(&mut self, value: &LogValue, _: &str) -> Option<Value> {
        match value {
            LogValue::Undefined | LogValue::Null => Some(Value::Null),
            LogValue::Bool(b) => Some(Value::Bool(*b)),
            LogValue::Int(i) => Some(Value::from(*i)),
            LogValue::UInt(u) => Some(Value::from(*u)),
            LogValue::Float(f) => Some(Number::from_f64(*f).map_or(Value::Null, Value::Number)),
            LogValue::String(s) => Some(Value::String(s.clone())),
            // Custom objects without any hook.
            LogValue::Custom(_) => Some(Value::Null),
            _ => None,
        }
    }
}
