//! Turns origin `{data, errors}` envelopes into a single tree where failed
//! fields hold their error.

use apollo_compiler::Name;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::error::FetchError;
use crate::graphql;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

/// A value returned by an origin API, with errors placed where the failing
/// field would have been.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ProxyValue {
    #[default]
    Null,
    /// A scalar or enum value.
    Leaf(Value),
    List(Vec<ProxyValue>),
    Object(IndexMap<String, ProxyValue>),
    /// The field failed with this error.
    Error(Box<graphql::Error>),
}

impl From<Value> for ProxyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ProxyValue::Null,
            Value::Array(items) => ProxyValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(fields) => ProxyValue::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key.as_str().to_string(), value.into()))
                    .collect(),
            ),
            leaf => ProxyValue::Leaf(leaf),
        }
    }
}

impl ProxyValue {
    /// The value under `key` when this is an object.
    pub fn get(&self, key: &str) -> Option<&ProxyValue> {
        match self {
            ProxyValue::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ProxyValue::Null)
    }

    /// Converts back to JSON, failing with the first error found in the tree.
    pub fn to_json(&self) -> Result<Value, graphql::Error> {
        Ok(match self {
            ProxyValue::Null => Value::Null,
            ProxyValue::Leaf(value) => value.clone(),
            ProxyValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(ProxyValue::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            ProxyValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| Ok((key.as_str().into(), value.to_json()?)))
                    .collect::<Result<_, graphql::Error>>()?,
            ),
            ProxyValue::Error(error) => return Err(error.as_ref().clone()),
        })
    }

    /// Writes `value` at `path`, creating the objects and lists leading to it.
    fn set_at_path(&mut self, path: &[PathElement], value: ProxyValue) {
        let Some((first, rest)) = path.split_first() else {
            *self = value;
            return;
        };
        let child = match first {
            PathElement::Key(key) => {
                if !matches!(self, ProxyValue::Object(_)) {
                    *self = ProxyValue::Object(IndexMap::new());
                }
                let ProxyValue::Object(fields) = self else {
                    return;
                };
                fields.entry(key.clone()).or_default()
            }
            PathElement::Index(index) => {
                if !matches!(self, ProxyValue::List(_)) {
                    *self = ProxyValue::List(Vec::new());
                }
                let ProxyValue::List(items) = self else {
                    return;
                };
                if items.len() <= *index {
                    items.resize(index + 1, ProxyValue::Null);
                }
                &mut items[*index]
            }
        };
        child.set_at_path(rest, value);
    }
}

/// Merges the errors of an origin response into its data.
///
/// Errors with a path become [`ProxyValue::Error`] at that path. Errors
/// without one fail the whole call.
pub fn inject_errors(service: &str, response: graphql::Response) -> Result<ProxyValue, FetchError> {
    let mut data = ProxyValue::from(response.data.unwrap_or_default());
    if response.errors.is_empty() {
        return Ok(data);
    }

    let (located, global): (Vec<_>, Vec<_>) = response
        .errors
        .into_iter()
        .partition(|error| error.path.as_ref().is_some_and(|path| !path.is_empty()));
    if !global.is_empty() {
        return Err(FetchError::SubrequestGraphQLErrors {
            service: service.to_string(),
            message: global.iter().map(|error| &error.message).join("\n"),
        });
    }

    for error in located {
        let path = error.path.clone().unwrap_or_default();
        data.set_at_path(&path.0, ProxyValue::Error(Box::new(error)));
    }
    Ok(data)
}

/// Walks `path` through `value`.
///
/// Lists met on the way are mapped element-wise with the remaining path.
/// `null` and errors are returned as they are as soon as they are reached.
/// Returns `None` when a key is missing.
pub fn extract_by_path(value: &ProxyValue, path: &[Name]) -> Option<ProxyValue> {
    let Some((key, rest)) = path.split_first() else {
        return Some(value.clone());
    };
    match value {
        ProxyValue::Null | ProxyValue::Error(_) => Some(value.clone()),
        ProxyValue::List(items) => Some(ProxyValue::List(
            items
                .iter()
                .map(|item| extract_by_path(item, path).unwrap_or_default())
                .collect(),
        )),
        ProxyValue::Object(fields) => extract_by_path(fields.get(key.as_str())?, rest),
        ProxyValue::Leaf(_) => None,
    }
}
