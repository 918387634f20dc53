#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `value` is the recursive tagged-variant value type shared by every layer
//! of the configuration database: backends decode it off disk, the source
//! stack merges it, the listener tree carries it in change events, and the
//! client cache stores it keyed by path.
//!
//! # Design
//!
//! [`Value`] is a closed sum type (scalars, a homogeneous [`List`], a
//! [`Pair`], a [`Schema`] descriptor, and the [`Value::Invalid`] decode-failure
//! sentinel). [`Schema`] lives in this crate rather than a separate one
//! because `Schema::default_value` is itself a `Value` and `Value::Schema`
//! holds a `Schema` — the two types are mutually recursive in the source
//! material this crate is modeled on, and Rust has no forward-declared
//! cross-crate types to split them cleanly.
//!
//! Canonical encoding follows `gconf_value_encode`/`gconf_value_decode` byte
//! for byte: type-tag byte, then a type-specific payload. See
//! [`Value::encode`] and [`Value::decode`] for the grammar.
//!
//! # Invariants
//!
//! - `Value::decode(&Value::encode(v)) == Ok(v)` for every valid `v` ([`Value::validate`] passes).
//! - A [`List`]'s elements all report [`Value::value_type`] equal to the list's declared element type.
//! - A [`Pair`]'s car and cdr individually satisfy [`Value::validate`] and are never themselves lists or pairs.
//! - Numeric encode/decode never consults the process locale; Rust's `f64`/`i32`
//!   `Display`/`FromStr` implementations are already locale-independent, which
//!   is the natural way to satisfy the source material's "pin locale to C" rule.
//!
//! # Errors
//!
//! [`Value::decode`] returns [`DecodeError`] on malformed input. [`Value::validate`]
//! returns [`ValidationError`] describing the first invariant violation found.
//!
//! # Examples
//!
//! ```
//! use value::Value;
//!
//! let v = Value::Int(42);
//! let encoded = v.encode();
//! assert_eq!(encoded, "i42");
//! assert_eq!(Value::decode(&encoded).unwrap(), v);
//! ```
//!
//! # See also
//!
//! - [`schema`](../schema/index.html) for schema-file loading built atop [`Schema`].
//! - [`keypath`](../keypath/index.html) for the key grammar values are stored under.

use std::cmp::Ordering;
use std::fmt;

#[cfg(test)]
mod tests;

/// The type tag of a [`Value`], used for schema declarations and list/pair
/// element typing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueType {
    /// `Value::Invalid` — never stored, decode-failure sentinel only.
    Invalid,
    /// `Value::String`.
    String,
    /// `Value::Int`.
    Int,
    /// `Value::Float`.
    Float,
    /// `Value::Bool`.
    Bool,
    /// `Value::Schema`.
    Schema,
    /// `Value::List`.
    List,
    /// `Value::Pair`.
    Pair,
}

impl ValueType {
    /// The single-byte wire tag used by the canonical encoding, matching
    /// the original's `type_byte` table exactly.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            ValueType::Int => b'i',
            ValueType::Bool => b'b',
            ValueType::Float => b'f',
            ValueType::String => b's',
            ValueType::Schema => b'c',
            ValueType::List => b'l',
            ValueType::Pair => b'p',
            ValueType::Invalid => b'v',
        }
    }

    /// Inverse of [`ValueType::tag`]. Unknown bytes decode to `Invalid`,
    /// matching the original's `byte_type` default case.
    #[must_use]
    pub const fn from_tag(tag: u8) -> ValueType {
        match tag {
            b'i' => ValueType::Int,
            b'b' => ValueType::Bool,
            b'f' => ValueType::Float,
            b's' => ValueType::String,
            b'c' => ValueType::Schema,
            b'l' => ValueType::List,
            b'p' => ValueType::Pair,
            _ => ValueType::Invalid,
        }
    }

    /// Ordinal used as the primary key of [`Value`]'s total order.
    const fn ordinal(self) -> u8 {
        match self {
            ValueType::Invalid => 0,
            ValueType::String => 1,
            ValueType::Int => 2,
            ValueType::Float => 3,
            ValueType::Bool => 4,
            ValueType::Schema => 5,
            ValueType::List => 6,
            ValueType::Pair => 7,
        }
    }
}

/// A recursive, tagged-variant configuration value.
///
/// `List` and `Pair` elements are restricted to scalar-or-schema types —
/// nesting a `List` inside a `List`/`Pair`, or a `Pair` inside a `List`/`Pair`,
/// is rejected by [`Value::validate`] (it can still be *constructed*, since
/// encode/decode must be able to represent a malformed wire value long enough
/// to report the violation).
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Decode-failure sentinel. Never stored.
    Invalid,
    /// Signed integer, 32-bit range adequate.
    Int(i32),
    /// IEEE double.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Schema descriptor value (metadata describing another key).
    Schema(Box<Schema>),
    /// Homogeneous list of a declared element type.
    List {
        /// Declared element type; every element must report this type.
        element_type: ValueType,
        /// The elements.
        items: Vec<Value>,
    },
    /// A pair of values, each individually scalar-or-schema typed.
    Pair(Box<Value>, Box<Value>),
}

/// A type descriptor describing another key's expected value, defaults, and
/// localized documentation.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Schema {
    /// Declared type of the key this schema describes.
    pub value_type: ValueType,
    /// Declared list element type, when `value_type == ValueType::List`.
    pub list_element_type: Option<ValueType>,
    /// Declared car type, when `value_type == ValueType::Pair`.
    pub car_type: Option<ValueType>,
    /// Declared cdr type, when `value_type == ValueType::Pair`.
    pub cdr_type: Option<ValueType>,
    /// Language tag; empty string means "default locale".
    pub locale: String,
    /// The application that registered this schema.
    pub owner: String,
    /// Short, single-line description.
    pub short_desc: String,
    /// Long-form description.
    pub long_desc: String,
    /// Optional default value, boxed to keep `Schema` from being infinitely sized.
    pub default_value: Option<Box<Value>>,
}

impl Schema {
    /// A new schema with the given declared type and everything else empty/default.
    #[must_use]
    pub fn new(value_type: ValueType) -> Self {
        Schema {
            value_type,
            ..Schema::default()
        }
    }

    /// Returns a deep copy. `Schema` already derives `Clone`; this exists to
    /// mirror the original's explicit `gconf_schema_copy` entry point for
    /// callers translating 1:1 from the source material.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Invalid
    }
}

/// Error returned by [`Value::decode`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The input was empty.
    #[error("empty encoded value")]
    Empty,
    /// The leading tag byte did not match any known type.
    #[error("unrecognized type tag {0:?}")]
    UnknownTag(char),
    /// A quoted field was malformed (missing opening/closing quote).
    #[error("malformed quoted string: {0}")]
    BadQuoting(String),
    /// A numeric payload did not parse.
    #[error("invalid numeric payload: {0}")]
    BadNumber(String),
    /// A composite encoding (schema/list/pair) was missing an expected field.
    #[error("truncated {0} encoding")]
    Truncated(&'static str),
}

/// Error returned by [`Value::validate`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A string value contained non-UTF-8 bytes. Unreachable for in-memory
    /// `Value::String` (Rust's `String` is always valid UTF-8); retained for
    /// callers validating bytes decoded from a backend.
    #[error("string payload is not valid UTF-8")]
    NotUtf8,
    /// A list contained an element whose type did not match the declared element type.
    #[error("list element at index {index} has type {actual:?}, expected {expected:?}")]
    ListElementTypeMismatch {
        /// Index of the offending element.
        index: usize,
        /// The element's actual type.
        actual: ValueType,
        /// The list's declared element type.
        expected: ValueType,
    },
    /// A list or pair nested another list or pair, which is disallowed.
    #[error("nested {0:?} inside a list/pair element position")]
    NestedComposite(ValueType),
}

impl Value {
    /// Returns this value's [`ValueType`].
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Invalid => ValueType::Invalid,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Bool(_) => ValueType::Bool,
            Value::String(_) => ValueType::String,
            Value::Schema(_) => ValueType::Schema,
            Value::List { .. } => ValueType::List,
            Value::Pair(..) => ValueType::Pair,
        }
    }

    /// Constructs the default (empty/zero) value of a given type, mirroring
    /// `gconf_value_new`.
    #[must_use]
    pub fn new(value_type: ValueType) -> Value {
        match value_type {
            ValueType::Invalid => Value::Invalid,
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Bool => Value::Bool(false),
            ValueType::String => Value::String(String::new()),
            ValueType::Schema => Value::Schema(Box::new(Schema::default())),
            ValueType::List => Value::List {
                element_type: ValueType::Invalid,
                items: Vec::new(),
            },
            ValueType::Pair => Value::Pair(Box::new(Value::Invalid), Box::new(Value::Invalid)),
        }
    }

    /// Checks that this value satisfies every structural invariant in
    /// spec.md §3/§4.1: UTF-8 strings (trivially true for `String`, retained
    /// for symmetry with `decode`), homogeneous list elements, and no nested
    /// lists/pairs inside list/pair element positions.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Value::List { element_type, items } => {
                if matches!(element_type, ValueType::List | ValueType::Pair) {
                    return Err(ValidationError::NestedComposite(*element_type));
                }
                for (index, item) in items.iter().enumerate() {
                    if matches!(item, Value::List { .. } | Value::Pair(..)) {
                        return Err(ValidationError::NestedComposite(item.value_type()));
                    }
                    if item.value_type() != *element_type {
                        return Err(ValidationError::ListElementTypeMismatch {
                            index,
                            actual: item.value_type(),
                            expected: *element_type,
                        });
                    }
                    item.validate()?;
                }
                Ok(())
            }
            Value::Pair(car, cdr) => {
                for side in [car.as_ref(), cdr.as_ref()] {
                    if matches!(side, Value::List { .. } | Value::Pair(..)) {
                        return Err(ValidationError::NestedComposite(side.value_type()));
                    }
                    side.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Human-readable rendering (not the canonical wire encoding).
    #[must_use]
    pub fn to_human_string(&self) -> String {
        match self {
            Value::Invalid => "<invalid>".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => (if *b { "true" } else { "false" }).to_string(),
            Value::String(s) => s.clone(),
            Value::Schema(schema) => format!("<schema {:?}>", schema.value_type),
            Value::List { items, .. } => {
                let parts: Vec<String> = items.iter().map(Value::to_human_string).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Pair(car, cdr) => {
                format!("({},{})", car.to_human_string(), cdr.to_human_string())
            }
        }
    }

    /// Encodes this value into the canonical round-trippable string form.
    ///
    /// Grammar (resolved from `gconf_value_encode`):
    /// - `Int`: `i<decimal>`
    /// - `Bool`: `bt` / `bf`
    /// - `Float`: `f<decimal>` (Rust's `f64::to_string`, locale-independent)
    /// - `String`: `s<raw utf8>` (unquoted; only composite *fields* are quoted)
    /// - `Schema`: `c<type><list_type><car_type><cdr_type>,"<locale>","<short>","<long>","<default>"`
    /// - `List`: `l<element_type>` then `,"<elem>"` per element
    /// - `Pair`: `p"<car>","<cdr>"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Value::Invalid => "v".to_string(),
            Value::Int(i) => format!("i{i}"),
            Value::Bool(b) => format!("b{}", if *b { 't' } else { 'f' }),
            Value::Float(f) => format!("f{f}"),
            Value::String(s) => format!("s{s}"),
            Value::Schema(schema) => {
                let mut out = String::new();
                out.push('c');
                out.push(schema.value_type.tag() as char);
                out.push(schema.list_element_type.unwrap_or(ValueType::Invalid).tag() as char);
                out.push(schema.car_type.unwrap_or(ValueType::Invalid).tag() as char);
                out.push(schema.cdr_type.unwrap_or(ValueType::Invalid).tag() as char);
                out.push(',');
                out.push_str(&quote(&schema.locale));
                out.push(',');
                out.push_str(&quote(&schema.short_desc));
                out.push(',');
                out.push_str(&quote(&schema.long_desc));
                out.push(',');
                let default_encoded = schema
                    .default_value
                    .as_ref()
                    .map_or_else(String::new, |v| v.encode());
                out.push_str(&quote(&default_encoded));
                out
            }
            Value::List { element_type, items } => {
                let mut out = String::new();
                out.push('l');
                out.push(element_type.tag() as char);
                for item in items {
                    out.push(',');
                    out.push_str(&quote(&item.encode()));
                }
                out
            }
            Value::Pair(car, cdr) => {
                format!("p{},{}", quote(&car.encode()), quote(&cdr.encode()))
            }
        }
    }

    /// Decodes the canonical string form produced by [`Value::encode`].
    ///
    /// A list element that fails to parse, or whose decoded type doesn't
    /// match the list's declared element type, is silently dropped and the
    /// remaining elements form the list — matching `gconf_value_decode`'s
    /// warn-and-continue behavior rather than failing the whole decode. The
    /// top-level call returns `Err` only for unrecoverable framing errors
    /// (empty input, unknown top-level tag, truncated composite fields).
    pub fn decode(encoded: &str) -> Result<Value, DecodeError> {
        let mut chars = encoded.chars();
        let tag = chars.next().ok_or(DecodeError::Empty)?;
        let rest = chars.as_str();

        match ValueType::from_tag(tag as u8) {
            ValueType::Invalid => {
                if tag == 'v' {
                    Ok(Value::Invalid)
                } else {
                    Err(DecodeError::UnknownTag(tag))
                }
            }
            ValueType::Int => rest
                .parse::<i32>()
                .map(Value::Int)
                .map_err(|e| DecodeError::BadNumber(e.to_string())),
            ValueType::Bool => match rest.chars().next() {
                Some('t') => Ok(Value::Bool(true)),
                Some('f') => Ok(Value::Bool(false)),
                _ => Err(DecodeError::Truncated("bool")),
            },
            ValueType::Float => rest
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| DecodeError::BadNumber(e.to_string())),
            ValueType::String => Ok(Value::String(rest.to_string())),
            ValueType::Schema => decode_schema(rest),
            ValueType::List => decode_list(rest),
            ValueType::Pair => decode_pair(rest),
        }
    }
}

fn decode_schema(rest: &str) -> Result<Value, DecodeError> {
    let bytes: Vec<char> = rest.chars().take(4).collect();
    if bytes.len() < 4 {
        return Err(DecodeError::Truncated("schema type bytes"));
    }
    let value_type = ValueType::from_tag(bytes[0] as u8);
    let list_element_type = optional_type(ValueType::from_tag(bytes[1] as u8));
    let car_type = optional_type(ValueType::from_tag(bytes[2] as u8));
    let cdr_type = optional_type(ValueType::from_tag(bytes[3] as u8));

    let after_types = &rest[bytes.iter().map(|c| c.len_utf8()).sum::<usize>()..];
    let mut cursor = after_types;
    cursor = expect_comma(cursor)?;

    let (locale, cursor) = unquote(cursor)?;
    let cursor = expect_comma(cursor)?;
    let (short_desc, cursor) = unquote(cursor)?;
    let cursor = expect_comma(cursor)?;
    let (long_desc, cursor) = unquote(cursor)?;
    let cursor = expect_comma(cursor)?;
    let (default_encoded, _cursor) = unquote(cursor)?;

    let default_value = if default_encoded.is_empty() {
        None
    } else {
        match Value::decode(&default_encoded) {
            Ok(v) => Some(Box::new(v)),
            Err(_) => None,
        }
    };

    Ok(Value::Schema(Box::new(Schema {
        value_type,
        list_element_type,
        car_type,
        cdr_type,
        locale,
        owner: String::new(),
        short_desc,
        long_desc,
        default_value,
    })))
}

fn optional_type(t: ValueType) -> Option<ValueType> {
    if t == ValueType::Invalid {
        None
    } else {
        Some(t)
    }
}

fn expect_comma(s: &str) -> Result<&str, DecodeError> {
    let mut it = s.chars();
    match it.next() {
        Some(',') => Ok(it.as_str()),
        _ => Err(DecodeError::Truncated("comma-separated field")),
    }
}

fn decode_list(rest: &str) -> Result<Value, DecodeError> {
    let mut chars = rest.chars();
    let type_tag = chars.next().ok_or(DecodeError::Truncated("list element type"))?;
    let element_type = ValueType::from_tag(type_tag as u8);
    let mut cursor = chars.as_str();

    let mut items = Vec::new();
    while !cursor.is_empty() {
        cursor = expect_comma(cursor)?;
        let (field, next) = unquote(cursor)?;
        cursor = next;
        match Value::decode(&field) {
            Ok(v) if v.value_type() == element_type => items.push(v),
            Ok(_) | Err(_) => {
                // An unparsable element, or one whose decoded type doesn't
                // match the list's declared element type, is dropped; the
                // survivors form the list (spec.md §8 scenario 3).
            }
        }
    }

    Ok(Value::List { element_type, items })
}

fn decode_pair(rest: &str) -> Result<Value, DecodeError> {
    let (car_field, cursor) = unquote(rest)?;
    let cursor = expect_comma(cursor)?;
    let (cdr_field, _cursor) = unquote(cursor)?;

    let car = Value::decode(&car_field).unwrap_or(Value::Invalid);
    let cdr = Value::decode(&cdr_field).unwrap_or(Value::Invalid);

    Ok(Value::Pair(Box::new(car), Box::new(cdr)))
}

/// Quotes a string the way `gconf_quote_string` does: wrap in `"…"`,
/// backslash-escaping only `"` and `\`. No other characters are escaped.
#[must_use]
pub fn quote(src: &str) -> String {
    let mut out = String::with_capacity(src.len() + 2);
    out.push('"');
    for c in src.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Unquotes a leading `"…"` field from `s`, returning the unescaped content
/// and the remainder of `s` after the closing quote. Mirrors
/// `gconf_unquote_string`'s behavior of tolerating an unterminated string by
/// returning everything consumed so far. Exposed publicly because several
/// crates above this one (the listener log, the RPC envelope) need the
/// same quoted-field grammar for their own record formats.
pub fn unquote(s: &str) -> Result<(String, &str), DecodeError> {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, '"')) => {}
        _ => return Err(DecodeError::BadQuoting(s.to_string())),
    }

    let mut out = String::new();
    let mut rest = "";
    let mut closed = false;
    let mut iter = s[1..].char_indices();
    while let Some((idx, c)) = iter.next() {
        match c {
            '"' => {
                rest = &s[1..][idx + 1..];
                closed = true;
                break;
            }
            '\\' => {
                if let Some((_, escaped)) = iter.next() {
                    match escaped {
                        '"' | '\\' => out.push(escaped),
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                } else {
                    out.push('\\');
                }
            }
            other => out.push(other),
        }
    }
    if !closed {
        rest = "";
    }
    Ok((out, rest))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Total order: type ordinal first, then per-type natural order. `Pair`
    /// compares car then cdr; `List` compares lexicographically; `Schema`
    /// compares by declared type, then short_desc, then long_desc, then
    /// locale, then element types, matching spec.md §4.1.
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = self.value_type().ordinal().cmp(&other.value_type().ordinal());
        if ord != Ordering::Equal {
            return ord;
        }
        match (self, other) {
            (Value::Invalid, Value::Invalid) => Ordering::Equal,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Schema(a), Value::Schema(b)) => a
                .value_type
                .cmp(&b.value_type)
                .then_with(|| a.short_desc.cmp(&b.short_desc))
                .then_with(|| a.long_desc.cmp(&b.long_desc))
                .then_with(|| a.locale.cmp(&b.locale))
                .then_with(|| a.list_element_type.cmp(&b.list_element_type))
                .then_with(|| a.car_type.cmp(&b.car_type))
                .then_with(|| a.cdr_type.cmp(&b.cdr_type)),
            (
                Value::List { element_type: et_a, items: a },
                Value::List { element_type: et_b, items: b },
            ) => et_a.cmp(et_b).then_with(|| a.cmp(b)),
            (Value::Pair(car_a, cdr_a), Value::Pair(car_b, cdr_b)) => {
                car_a.cmp(car_b).then_with(|| cdr_a.cmp(cdr_b))
            }
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_string())
    }
}
