//! Merging the arguments of a logging call into a single payload.

use crate::{
    keys,
    value::{LogValue, Object},
};

/// Merges the arguments of a logging call into one payload.
///
/// - A single argument is the payload, whatever it is.
/// - A string followed by one object without a `message` key becomes that object with `message`
///   set to the string.
/// - A string followed by other arguments is joined with the leading scalar arguments, separated
///   by spaces. The first object argument and everything after it are stored under the keys
///   `"0"`, `"1"`, ... of an object next to the joined `message`.
/// - Otherwise all arguments are stored under indexed keys.
///
/// # Examples
///
/// ```
/// use structured_logger::{log_args, normalize, LogValue};
///
/// assert_eq!(
///     normalize(log_args!["hello", LogValue::object([("thing", "world")])]),
///     LogValue::object([("thing", "world"), ("message", "hello")]),
/// );
/// assert_eq!(normalize(log_args!["a", 1, true]), LogValue::from("a 1 true"));
/// ```
pub fn normalize(args: Vec<LogValue>) -> LogValue {
    let mut args = args.into_iter();
    let Some(head) = args.next() else {
        return LogValue::Undefined;
    };
    let tail: Vec<LogValue> = args.collect();
    if tail.is_empty() {
        return head;
    }

    match head {
        LogValue::String(message) => with_message(message, tail),
        head => LogValue::Object(indexed(std::iter::once(head).chain(tail))),
    }
}

fn with_message(message: String, tail: Vec<LogValue>) -> LogValue {
    if let [only] = tail.as_slice() {
        if let Some(mut object) = spread(only) {
            object.insert(keys::MESSAGE.to_string(), LogValue::String(message));
            return LogValue::Object(object);
        }
    }

    let mut concatenated = message;
    let mut tail = tail.into_iter().peekable();
    while let Some(next) = tail.next_if(is_inline) {
        concatenated.push(' ');
        concatenated.push_str(&next.stringify());
    }

    let rest: Vec<LogValue> = tail.collect();
    if rest.is_empty() {
        return LogValue::String(concatenated);
    }
    let mut object = indexed(rest);
    object.insert(keys::MESSAGE.to_string(), LogValue::String(concatenated));
    LogValue::Object(object)
}

/// Whether a value is joined into the message rather than kept as data.
fn is_inline(value: &LogValue) -> bool {
    value.is_primitive() || matches!(value, LogValue::Date(_) | LogValue::RegExp(_))
}

/// The entries of a value that can be merged with a message, or `None` when the value has a
/// `message` of its own or is not a plain container.
fn spread(value: &LogValue) -> Option<Object> {
    match value {
        LogValue::Object(object) if !object.contains_key(keys::MESSAGE) => Some(object.clone()),
        LogValue::Array(items) => Some(indexed(items.iter().cloned())),
        LogValue::Bytes(bytes) => Some(indexed(bytes.iter().copied().map(LogValue::from))),
        LogValue::Shared(shared) => spread(&shared.get()),
        _ => None,
    }
}

fn indexed(items: impl IntoIterator<Item = LogValue>) -> Object {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| (index.to_string(), item))
        .collect()
}
