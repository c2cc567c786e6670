//! Types related to GraphQL requests, responses, etc.

use std::fmt;

use apollo_compiler::response::GraphQLError as CompilerExecutionError;
use apollo_compiler::response::ResponseDataPathSegment;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;

use crate::error::FetchError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

/// The error location
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in [`Response::data`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a builder that builds a GraphQL [`Error`] from its components.
    ///
    /// `.message` is required; `.locations`, `.path`, `.extensions` and
    /// `.extension_code` are optional. The extension code is ignored when
    /// the extensions already carry a `code`.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// Extract the error code from [`Error::extensions`] as a String if it is set.
    pub fn extension_code(&self) -> Option<String> {
        self.extensions.get("code").and_then(|c| match c {
            Value::String(s) => Some(s.as_str().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Bool(_) => None,
        })
    }

    /// Returns a copy of this error relocated at `path`.
    pub fn with_path(&self, path: Path) -> Self {
        Self {
            path: Some(path),
            ..self.clone()
        }
    }
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl From<CompilerExecutionError> for Error {
    fn from(error: CompilerExecutionError) -> Self {
        let CompilerExecutionError {
            message,
            locations,
            path,
            extensions,
        } = error;
        let locations = locations
            .into_iter()
            .map(|location| Location {
                line: location.line as u32,
                column: location.column as u32,
            })
            .collect::<Vec<_>>();
        let path = if !path.is_empty() {
            let elements = path
                .into_iter()
                .map(|element| match element {
                    ResponseDataPathSegment::Field(name) => {
                        PathElement::Key(name.as_str().to_owned())
                    }
                    ResponseDataPathSegment::ListIndex(i) => PathElement::Index(i),
                })
                .collect();
            Some(Path(elements))
        } else {
            None
        };
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }
}

/// A GraphQL request as sent by a client.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    /// The GraphQL operation (e.g., query, mutation) string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// The (optional) GraphQL operation name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// The (optional) GraphQL variables in the form of a JSON object.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub variables: Object,
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
        }
    }
}

/// A GraphQL response: the `{data, errors}` envelope.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// Decodes the body an origin API answered with.
    pub(crate) fn from_bytes(service_name: &str, b: Bytes) -> Result<Response, FetchError> {
        let malformed = |reason: String| FetchError::SubrequestMalformedResponse {
            service: service_name.to_string(),
            reason,
        };
        let value = Value::from_bytes(b).map_err(|error| malformed(error.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(malformed("expected a JSON object".to_string()));
        };

        let data = object.remove("data");
        let errors = match object.remove("errors") {
            None | Some(Value::Null) => Vec::new(),
            Some(errors @ Value::Array(_)) => serde_json_bytes::from_value(errors)
                .map_err(|error| malformed(format!("invalid `errors`: {error}")))?,
            Some(_) => return Err(malformed("`errors` must be a list".to_string())),
        };
        let extensions = match object.remove("extensions") {
            Some(Value::Object(extensions)) => extensions,
            _ => Object::default(),
        };

        // Graphql spec says:
        // If the data entry in the response is not present, the errors entry in the response must not be empty.
        // It must contain at least one error. The errors it contains should indicate why no data was able to be returned.
        if data.is_none() && errors.is_empty() {
            return Err(malformed(
                "graphql response without data must contain at least one error".to_string(),
            ));
        }

        Ok(Response {
            data,
            errors,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn response_from_bytes_keeps_error_paths() {
        let response = Response::from_bytes(
            "test",
            Bytes::from_static(
                br#"{"data":{"foo":null},"errors":[{"message":"boom","path":["foo",0]}]}"#,
            ),
        )
        .unwrap();
        assert_eq!(response.data, Some(json!({ "foo": null })));
        assert_eq!(
            response.errors,
            vec![
                Error::builder()
                    .message("boom")
                    .path(Path::from_iter(["foo", "0"]))
                    .build()
            ]
        );
    }

    #[test]
    fn response_without_data_needs_errors() {
        let error = Response::from_bytes("test", Bytes::from_static(b"{}")).unwrap_err();
        assert!(matches!(
            error,
            FetchError::SubrequestMalformedResponse { .. }
        ));
    }

    #[test]
    fn error_builder_sets_extension_code() {
        let error = Error::builder()
            .message("nope")
            .extension_code("REMOTE_ERROR")
            .build();
        assert_eq!(error.extension_code().as_deref(), Some("REMOTE_ERROR"));
        assert_eq!(error.to_string(), "nope");
    }
}
