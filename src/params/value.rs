use serde::Serialize;
use std::{
    collections::{hash_map, HashMap},
    fmt,
};
use thiserror::Error;

/// A single request parameter.
///
/// Textual sources (cookies, headers, query strings and forms) produce
/// [`Scalar`](Value::Scalar) and [`Sequence`](Value::Sequence). A JSON object body
/// produces a [`Scalar`](Value::Scalar) for string members and
/// [`Json`](Value::Json) for everything else.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(String),
    Sequence(Vec<String>),
    Json(serde_json::Value),
}

impl Value {
    pub(crate) fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Value::Scalar(s),
            other => Value::Json(other),
        }
    }

    /// Collapses the values of one key: one value is a scalar, several a sequence.
    pub(crate) fn collapse(mut values: Vec<String>) -> Self {
        match values.len() {
            1 => Value::Scalar(values.remove(0)),
            _ => Value::Sequence(values),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "string",
            Value::Sequence(_) => "array",
            Value::Json(serde_json::Value::Null) => "null",
            Value::Json(serde_json::Value::Bool(_)) => "bool",
            Value::Json(serde_json::Value::Number(_)) => "number",
            Value::Json(serde_json::Value::String(_)) => "string",
            Value::Json(serde_json::Value::Array(_)) => "array",
            Value::Json(serde_json::Value::Object(_)) => "object",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// Returns the textual value.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Scalar(s) => Ok(s.as_str()),
            Value::Json(serde_json::Value::String(s)) => Ok(s.as_str()),
            _ => Err(self.mismatch("string")),
        }
    }

    /// Parses a scalar as a signed integer, or reads an integral JSON number.
    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::Scalar(s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::InvalidNumber(s.clone())),
            Value::Json(serde_json::Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| ValueError::InvalidNumber(n.to_string())),
            _ => Err(self.mismatch("number")),
        }
    }

    /// Parses a scalar as a float, or reads a JSON number.
    pub fn as_float(&self) -> Result<f64, ValueError> {
        match self {
            Value::Scalar(s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::InvalidNumber(s.clone())),
            Value::Json(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| ValueError::InvalidNumber(n.to_string())),
            _ => Err(self.mismatch("number")),
        }
    }

    /// Reads a JSON boolean, or a scalar spelled `true`, `false`, `1` or `0`.
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Scalar(s) => match s.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(self.mismatch("bool")),
            },
            Value::Json(serde_json::Value::Bool(b)) => Ok(*b),
            _ => Err(self.mismatch("bool")),
        }
    }

    /// Returns the elements of a sequence.
    ///
    /// A scalar is a one-element array. A JSON array is accepted when all of
    /// its elements are strings.
    pub fn as_array(&self) -> Result<Vec<&str>, ValueError> {
        match self {
            Value::Scalar(s) => Ok(vec![s.as_str()]),
            Value::Sequence(items) => Ok(items.iter().map(String::as_str).collect()),
            Value::Json(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().ok_or_else(|| self.mismatch("array of strings")))
                .collect(),
            _ => Err(self.mismatch("array")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => f.write_str(s),
            Value::Sequence(items) => f.write_str(&items.join(",")),
            Value::Json(value) => write!(f, "{value}"),
        }
    }
}

/// Failure of a typed parameter accessor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("parameter `{0}` is missing")]
    Missing(String),
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("`{0}` is not a valid number")]
    InvalidNumber(String),
}

/// The unified parameter map of a request.
///
/// Keys are lower-case. Sources are merged in the order cookies, `x-`
/// headers, query string, body, a later source replacing the value of an
/// earlier one.
///
/// # Examples
/// ```
/// use relay_web::{Method, Parsed, Parts, Request, ValueError};
///
/// let req = Request::new(Parts::new(Method::Get, "/"), Parsed::default())
///     .with_path_params([("page", "2"), ("tag", "rust")]);
/// let params = req.params();
///
/// assert_eq!(params.int("page"), Ok(2));
/// assert_eq!(params.array("tag"), Ok(vec!["rust"]));
/// assert_eq!(params.str("missing"), Err(ValueError::Missing("missing".into())));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(HashMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[inline(always)]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    fn require(&self, key: &str) -> Result<&Value, ValueError> {
        self.0
            .get(key)
            .ok_or_else(|| ValueError::Missing(key.to_owned()))
    }

    pub fn str(&self, key: &str) -> Result<&str, ValueError> {
        self.require(key)?.as_str()
    }

    pub fn int(&self, key: &str) -> Result<i64, ValueError> {
        self.require(key)?.as_int()
    }

    pub fn float(&self, key: &str) -> Result<f64, ValueError> {
        self.require(key)?.as_float()
    }

    pub fn bool(&self, key: &str) -> Result<bool, ValueError> {
        self.require(key)?.as_bool()
    }

    pub fn array(&self, key: &str) -> Result<Vec<&str>, ValueError> {
        self.require(key)?.as_array()
    }

    #[inline(always)]
    pub(crate) fn insert(&mut self, key: String, value: Value) {
        self.0.insert(key, value);
    }

    /// Merges `other` in, its values replacing existing ones.
    pub(crate) fn extend(&mut self, other: Params) {
        self.0.extend(other.0);
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a Value);
    type IntoIter = hash_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scalar(s: &str) -> Value {
        Value::Scalar(s.to_owned())
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(scalar("42").as_int(), Ok(42));
        assert_eq!(scalar(" -7 ").as_int(), Ok(-7));
        assert_eq!(scalar("2.5").as_float(), Ok(2.5));
        assert_eq!(scalar("1").as_bool(), Ok(true));
        assert_eq!(scalar("false").as_bool(), Ok(false));
        assert_eq!(scalar("abc").as_str(), Ok("abc"));
        assert_eq!(scalar("abc").as_array(), Ok(vec!["abc"]));
    }

    #[test]
    fn coercion_failures() {
        assert_eq!(
            scalar("4x").as_int(),
            Err(ValueError::InvalidNumber("4x".into()))
        );
        assert_eq!(
            scalar("yes").as_bool(),
            Err(ValueError::TypeMismatch {
                expected: "bool",
                found: "string"
            })
        );
        assert_eq!(
            Value::Sequence(vec!["a".into(), "b".into()]).as_str(),
            Err(ValueError::TypeMismatch {
                expected: "string",
                found: "array"
            })
        );
        assert_eq!(
            Value::Json(json!({"a": 1})).as_int(),
            Err(ValueError::TypeMismatch {
                expected: "number",
                found: "object"
            })
        );
    }

    #[test]
    fn json_coercions() {
        assert_eq!(Value::Json(json!(19)).as_int(), Ok(19));
        assert_eq!(Value::Json(json!(1.5)).as_float(), Ok(1.5));
        assert_eq!(Value::Json(json!(true)).as_bool(), Ok(true));
        assert_eq!(Value::Json(json!(["x", "y"])).as_array(), Ok(vec!["x", "y"]));
        assert_eq!(
            Value::Json(json!(1.5)).as_int(),
            Err(ValueError::InvalidNumber("1.5".into()))
        );
        assert!(Value::Json(json!(["x", 1])).as_array().is_err());
    }

    #[test]
    fn json_strings_become_scalars() {
        assert_eq!(Value::from_json(json!("tom")), scalar("tom"));
        assert_eq!(Value::from_json(json!(null)), Value::Json(json!(null)));
    }

    #[test]
    fn collapse() {
        assert_eq!(Value::collapse(vec!["a".into()]), scalar("a"));
        assert_eq!(
            Value::collapse(vec!["a".into(), "b".into()]),
            Value::Sequence(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn display() {
        assert_eq!(scalar("a").to_string(), "a");
        assert_eq!(
            Value::Sequence(vec!["a".into(), "b".into()]).to_string(),
            "a,b"
        );
        assert_eq!(Value::Json(json!({"k": [1]})).to_string(), r#"{"k":[1]}"#);
    }

    #[test]
    fn later_source_overrides() {
        let mut params = Params::new();
        params.insert("id".into(), scalar("cookie"));
        params.insert("keep".into(), scalar("1"));

        let mut query = Params::new();
        query.insert("id".into(), scalar("query"));
        params.extend(query);

        assert_eq!(params.str("id"), Ok("query"));
        assert_eq!(params.int("keep"), Ok(1));
        assert_eq!(params.len(), 2);
        assert_eq!(
            params.int("nope"),
            Err(ValueError::Missing("nope".into()))
        );
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut params = Params::new();
        params.insert("tag".into(), Value::Sequence(vec!["a".into()]));
        params.insert("n".into(), Value::Json(json!(3)));

        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"tag": ["a"], "n": 3})
        );
    }
}
