//! Binding of untyped JSON tool arguments into typed argument structs.
//!
//! An argument struct lists its fields once, as a vector of [`Param`] rules
//! borrowed from `&mut self`. The same rule list drives both runtime
//! validation ([`bind`]) and the published JSON schema ([`input_schema`]), so
//! the two cannot drift apart.
//!
//! Every rule is evaluated against the input even after an earlier rule has
//! failed; all failures come back together as one [`ParamErrors`]. A struct is
//! only handed to the caller when no rule failed.

use std::fmt;
use std::mem::discriminant;

use chrono::NaiveDate;
use serde_json::{Map, Value, json};

/// Pattern accepted for date parameters: ISO `YYYY-MM-DD` or legacy `YYYYMMDD`.
const DATE_PATTERN: &str = r"^(\d{4}-\d{2}-\d{2}|\d{8})$";

/// An argument struct whose fields can be bound from a JSON object.
pub trait ToolArgs: Default {
    fn params(&mut self) -> Vec<Param<'_>>;
}

/// One failing rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required parameter '{field}'")]
    Missing { field: String },
    #[error("parameter '{field}' must be {expected}")]
    WrongType { field: String, expected: &'static str },
    #[error("parameter '{field}' must be a whole number, got {value}")]
    NotInteger { field: String, value: String },
    #[error("parameter '{field}' is out of range for a 64-bit signed integer, got {value}")]
    OutOfRange { field: String, value: String },
    #[error("parameter '{field}' must be a date (YYYY-MM-DD or YYYYMMDD), got {value:?}")]
    InvalidDate { field: String, value: String },
    #[error("parameter '{field}' has invalid value {value:?}; allowed values are: {}", .allowed.join(", "))]
    NotAllowed {
        field: String,
        value: String,
        allowed: &'static [&'static str],
    },
    #[error("parameter '{field}' mixes element types")]
    MixedList { field: String },
}

impl ParamError {
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field }
            | Self::WrongType { field, .. }
            | Self::NotInteger { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::InvalidDate { field, .. }
            | Self::NotAllowed { field, .. }
            | Self::MixedList { field } => field,
        }
    }

    fn field_mut(&mut self) -> &mut String {
        match self {
            Self::Missing { field }
            | Self::WrongType { field, .. }
            | Self::NotInteger { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::InvalidDate { field, .. }
            | Self::NotAllowed { field, .. }
            | Self::MixedList { field } => field,
        }
    }

    fn under(mut self, parent: &str) -> Self {
        let field = self.field_mut();
        *field = format!("{parent}.{field}");
        self
    }
}

/// Every rule failure of one binding pass, in rule order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid parameters: {}", join_errors(.0))]
pub struct ParamErrors(Vec<ParamError>);

impl ParamErrors {
    pub fn single(error: ParamError) -> Self {
        Self(vec![error])
    }

    pub fn errors(&self) -> &[ParamError] {
        &self.0
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(ParamError::field)
    }

    /// Per-field detail for error payloads.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|e| json!({ "field": e.field(), "message": e.to_string() }))
                .collect(),
        )
    }
}

fn join_errors(errors: &[ParamError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Destination of a rule: a plain field is required, an `Option` field is
/// optional and stays `None` when the input omits it (or sends `null`).
pub enum Slot<'a, T> {
    Required(&'a mut T),
    Optional(&'a mut Option<T>),
}

impl<T> Slot<'_, T> {
    fn is_required(&self) -> bool {
        matches!(self, Slot::Required(_))
    }

    fn assign(self, value: T) {
        match self {
            Slot::Required(dest) => *dest = value,
            Slot::Optional(dest) => *dest = Some(value),
        }
    }
}

macro_rules! slot_from {
    ($($ty:ty),* $(,)?) => {$(
        impl<'a> From<&'a mut $ty> for Slot<'a, $ty> {
            fn from(dest: &'a mut $ty) -> Self {
                Slot::Required(dest)
            }
        }

        impl<'a> From<&'a mut Option<$ty>> for Slot<'a, $ty> {
            fn from(dest: &'a mut Option<$ty>) -> Self {
                Slot::Optional(dest)
            }
        }
    )*};
}

slot_from!(String, i64, bool, NaiveDate, Vec<String>, Vec<i64>);

trait NestedTarget {
    fn schema(&self) -> Value;
    fn bind_present(&mut self, field: &str, value: &Value, errors: &mut Vec<ParamError>);
}

struct NestedSlot<'a, T>(&'a mut Option<T>);

impl<T: ToolArgs> NestedTarget for NestedSlot<'_, T> {
    fn schema(&self) -> Value {
        input_schema::<T>()
    }

    fn bind_present(&mut self, field: &str, value: &Value, errors: &mut Vec<ParamError>) {
        let Value::Object(map) = value else {
            errors.push(wrong_type(field, "an object"));
            return;
        };
        match bind::<T>(map) {
            Ok(inner) => *self.0 = Some(inner),
            Err(ParamErrors(inner)) => errors.extend(inner.into_iter().map(|e| e.under(field))),
        }
    }
}

enum Target<'a> {
    String(Slot<'a, String>),
    Integer(Slot<'a, i64>),
    Boolean(Slot<'a, bool>),
    Date(Slot<'a, NaiveDate>),
    StringList(Slot<'a, Vec<String>>),
    IntegerList(Slot<'a, Vec<i64>>),
    Object(Box<dyn NestedTarget + 'a>),
}

/// One binding rule: source field name, coercion kind and destination.
pub struct Param<'a> {
    name: &'static str,
    description: &'static str,
    allowed: Option<&'static [&'static str]>,
    target: Target<'a>,
}

impl<'a> Param<'a> {
    fn new(name: &'static str, target: Target<'a>) -> Self {
        Self {
            name,
            description: "",
            allowed: None,
            target,
        }
    }

    pub fn string(name: &'static str, dest: impl Into<Slot<'a, String>>) -> Self {
        Self::new(name, Target::String(dest.into()))
    }

    /// Integral JSON number. `3.0` is accepted, `3.5` is not.
    pub fn integer(name: &'static str, dest: impl Into<Slot<'a, i64>>) -> Self {
        Self::new(name, Target::Integer(dest.into()))
    }

    pub fn boolean(name: &'static str, dest: impl Into<Slot<'a, bool>>) -> Self {
        Self::new(name, Target::Boolean(dest.into()))
    }

    pub fn date(name: &'static str, dest: impl Into<Slot<'a, NaiveDate>>) -> Self {
        Self::new(name, Target::Date(dest.into()))
    }

    pub fn string_list(name: &'static str, dest: impl Into<Slot<'a, Vec<String>>>) -> Self {
        Self::new(name, Target::StringList(dest.into()))
    }

    pub fn integer_list(name: &'static str, dest: impl Into<Slot<'a, Vec<i64>>>) -> Self {
        Self::new(name, Target::IntegerList(dest.into()))
    }

    /// Nested argument object, bound only when the field is present.
    pub fn object<T: ToolArgs + 'a>(name: &'static str, dest: &'a mut Option<T>) -> Self {
        Self::new(name, Target::Object(Box::new(NestedSlot(dest))))
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Restrict string values (or string list elements) to a fixed,
    /// case-sensitive set.
    pub fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }

    fn is_required(&self) -> bool {
        match &self.target {
            Target::String(slot) => slot.is_required(),
            Target::Integer(slot) => slot.is_required(),
            Target::Boolean(slot) => slot.is_required(),
            Target::Date(slot) => slot.is_required(),
            Target::StringList(slot) => slot.is_required(),
            Target::IntegerList(slot) => slot.is_required(),
            Target::Object(_) => false,
        }
    }

    fn schema(&self) -> Value {
        let enumeration = self.allowed.map(|allowed| json!(allowed));
        let mut schema = match &self.target {
            Target::String(_) => {
                let mut s = json!({ "type": "string" });
                if let Some(values) = enumeration {
                    s["enum"] = values;
                }
                s
            }
            Target::Integer(_) => json!({ "type": "integer" }),
            Target::Boolean(_) => json!({ "type": "boolean" }),
            Target::Date(_) => json!({ "type": "string", "pattern": DATE_PATTERN }),
            Target::StringList(_) => {
                let mut items = json!({ "type": "string" });
                if let Some(values) = enumeration {
                    items["enum"] = values;
                }
                json!({ "type": "array", "items": items })
            }
            Target::IntegerList(_) => json!({ "type": "array", "items": { "type": "integer" } }),
            Target::Object(nested) => nested.schema(),
        };
        if !self.description.is_empty() {
            schema["description"] = Value::String(self.description.to_string());
        }
        schema
    }

    fn bind(self, args: &Map<String, Value>, errors: &mut Vec<ParamError>) {
        let name = self.name;
        let allowed = self.allowed;
        let present = args.get(name).filter(|v| !v.is_null());
        match self.target {
            Target::String(slot) => store(slot, name, present, errors, |v| {
                let s = coerce_string(name, v)?;
                check_allowed(name, &s, allowed)?;
                Ok(s)
            }),
            Target::Integer(slot) => store(slot, name, present, errors, |v| coerce_integer(name, v)),
            Target::Boolean(slot) => store(slot, name, present, errors, |v| coerce_bool(name, v)),
            Target::Date(slot) => store(slot, name, present, errors, |v| coerce_date(name, v)),
            Target::StringList(slot) => store(slot, name, present, errors, |v| {
                let items = coerce_list(name, v, "a list of strings", coerce_string)?;
                for item in &items {
                    check_allowed(name, item, allowed)?;
                }
                Ok(items)
            }),
            Target::IntegerList(slot) => store(slot, name, present, errors, |v| {
                coerce_list(name, v, "a list of integers", coerce_integer)
            }),
            Target::Object(mut nested) => {
                if let Some(value) = present {
                    nested.bind_present(name, value, errors);
                }
            }
        }
    }
}

fn store<T>(
    slot: Slot<'_, T>,
    name: &str,
    present: Option<&Value>,
    errors: &mut Vec<ParamError>,
    coerce: impl FnOnce(&Value) -> Result<T, ParamError>,
) {
    match present {
        None if slot.is_required() => errors.push(ParamError::Missing {
            field: name.to_string(),
        }),
        None => {}
        Some(value) => match coerce(value) {
            Ok(bound) => slot.assign(bound),
            Err(e) => errors.push(e),
        },
    }
}

fn wrong_type(field: &str, expected: &'static str) -> ParamError {
    ParamError::WrongType {
        field: field.to_string(),
        expected,
    }
}

fn coerce_string(field: &str, value: &Value) -> Result<String, ParamError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(field, "a string"))
}

fn coerce_integer(field: &str, value: &Value) -> Result<i64, ParamError> {
    let Value::Number(number) = value else {
        return Err(wrong_type(field, "a number"));
    };
    if let Some(i) = number.as_i64() {
        return Ok(i);
    }
    let out_of_range = || ParamError::OutOfRange {
        field: field.to_string(),
        value: number.to_string(),
    };
    if number.is_u64() {
        return Err(out_of_range());
    }
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        Some(f) if f.fract() == 0.0 => Err(out_of_range()),
        _ => Err(ParamError::NotInteger {
            field: field.to_string(),
            value: number.to_string(),
        }),
    }
}

fn coerce_bool(field: &str, value: &Value) -> Result<bool, ParamError> {
    value.as_bool().ok_or_else(|| wrong_type(field, "a boolean"))
}

fn coerce_date(field: &str, value: &Value) -> Result<NaiveDate, ParamError> {
    let raw = value.as_str().ok_or_else(|| wrong_type(field, "a date string"))?;
    parse_date(raw).ok_or_else(|| ParamError::InvalidDate {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

/// ISO `YYYY-MM-DD` or legacy compact `YYYYMMDD`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match raw.len() {
        10 if raw.as_bytes()[4] == b'-' && raw.as_bytes()[7] == b'-' => {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
        }
        8 if all_digits(raw) => NaiveDate::parse_from_str(raw, "%Y%m%d").ok(),
        _ => None,
    }
}

fn coerce_list<T>(
    field: &str,
    value: &Value,
    expected: &'static str,
    element: fn(&str, &Value) -> Result<T, ParamError>,
) -> Result<Vec<T>, ParamError> {
    let Value::Array(items) = value else {
        return Err(wrong_type(field, expected));
    };
    if let Some(first) = items.first() {
        let kind = discriminant(first);
        if items.iter().any(|item| discriminant(item) != kind) {
            return Err(ParamError::MixedList {
                field: field.to_string(),
            });
        }
    }
    items
        .iter()
        .map(|item| element(field, item).map_err(|_| wrong_type(field, expected)))
        .collect()
}

fn check_allowed(
    field: &str,
    value: &str,
    allowed: Option<&'static [&'static str]>,
) -> Result<(), ParamError> {
    match allowed {
        Some(set) if !set.contains(&value) => Err(ParamError::NotAllowed {
            field: field.to_string(),
            value: value.to_string(),
            allowed: set,
        }),
        _ => Ok(()),
    }
}

/// Bind `args` into a fresh `T`, evaluating every rule.
pub fn bind<T: ToolArgs>(args: &Map<String, Value>) -> Result<T, ParamErrors> {
    let mut bound = T::default();
    let mut errors = Vec::new();
    for param in bound.params() {
        param.bind(args, &mut errors);
    }
    if errors.is_empty() {
        Ok(bound)
    } else {
        Err(ParamErrors(errors))
    }
}

/// JSON schema projected from `T`'s rule list.
pub fn input_schema<T: ToolArgs>() -> Value {
    let mut sample = T::default();
    let params = sample.params();
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in &params {
        properties.insert(param.name.to_string(), param.schema());
        if param.is_required() {
            required.push(Value::String(param.name.to_string()));
        }
    }
    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    schema
}

impl fmt::Debug for Param<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("required", &self.is_required())
            .finish()
    }
}

/// Legacy compact date wire format (`YYYYMMDD`) for older endpoints.
pub mod legacy_date {
    use chrono::NaiveDate;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => s.serialize_str(&date.format("%Y%m%d").to_string()),
            None => s.serialize_none(),
        }
    }
}
