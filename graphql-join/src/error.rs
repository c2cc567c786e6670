//! Error types of the join engine.

use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

use crate::graphql;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Failures while building a [`JoinSchema`](crate::JoinSchema).
///
/// All of them are fatal: a join IDL that produces one of these can not be served.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum JoinError {
    /// could not parse the join IDL: {0}
    Parse(String),

    /// invalid directive usage in the join IDL: {0}
    InvalidDirectives(DirectiveDiagnostics),

    /// the joined schema is invalid: {0}
    InvalidSchema(String),

    /// the join IDL must contain a schema definition
    MissingSchemaDefinition,

    /// the join IDL must contain only one schema definition
    DuplicateSchemaDefinition,

    /// the schema definition must declare a query root type
    MissingQueryRoot,

    /// every operation in the join IDL must be named
    AnonymousOperation,

    /// operation '{operation}' must be annotated with @send
    MissingSendDirective {
        /// The operation without a target API.
        operation: String,
    },

    /// operation '{operation}' is sent to unknown API '{api}'
    UnknownApi {
        /// The operation.
        operation: String,
        /// The API named by @send.
        api: String,
    },

    /// only query and mutation operations can be proxied, '{operation}' is a subscription
    UnsupportedOperationType {
        /// The operation.
        operation: String,
    },

    /// operation '{operation}' must contain at most one CLIENT_SELECTION spread, found {count}
    SplicePointCount {
        /// The operation.
        operation: String,
        /// How many spreads were found.
        count: usize,
    },

    /// unexpected spread of fragment '{fragment}' in {context}
    UnexpectedFragmentSpread {
        /// The spread fragment.
        fragment: String,
        /// Where the spread was found.
        context: String,
    },

    /// @resolveWith on {type_name}.{field_name} refers to unknown operation '{operation}'
    UnknownOperation {
        /// Owning type.
        type_name: String,
        /// Annotated field.
        field_name: String,
        /// The missing operation.
        operation: String,
    },

    /// @resolveWith on {type_name}.{field_name} refers to unknown fragment '{fragment}'
    UnknownFragment {
        /// Owning type.
        type_name: String,
        /// Annotated field.
        field_name: String,
        /// The missing fragment.
        fragment: String,
    },

    /// fragment '{fragment}' is defined on unknown type '{type_name}'
    UnknownFragmentType {
        /// The fragment.
        fragment: String,
        /// Its type condition.
        type_name: String,
    },

    /// type '{type_name}' is neither defined in the join IDL nor provided by any API
    UnknownType {
        /// The unresolved reference.
        type_name: String,
    },

    /// type '{type_name}' from API '{api}' conflicts with the definition provided by '{other_api}'
    TypeConflict {
        /// The conflicting type.
        type_name: String,
        /// API whose definition was rejected.
        api: String,
        /// API whose definition was kept.
        other_api: String,
    },

    /// root field {type_name}.{field_name} has no @resolveWith and its type is provided by several APIs: {apis}
    AmbiguousRootField {
        /// The root type.
        type_name: String,
        /// The field.
        field_name: String,
        /// APIs providing the root type, comma separated.
        apis: String,
    },

    /// root field {type_name}.{field_name} has no @resolveWith and its type is not provided by any API
    MissingResolvePlan {
        /// The root type.
        type_name: String,
        /// The field.
        field_name: String,
    },

    /// '{name}' is not a valid GraphQL name
    InvalidName {
        /// The rejected name.
        name: String,
    },
}

/// Diagnostics reported by [`JoinDirectives::validate`](crate::directives::JoinDirectives::validate).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveDiagnostics(pub Vec<DirectiveDiagnostic>);

impl std::fmt::Display for DirectiveDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, diagnostic) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

/// One invalid directive usage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{coordinate}: {message}")]
pub struct DirectiveDiagnostic {
    /// Where the directive was used, e.g. `Query.foo` or `query foo`.
    pub coordinate: String,
    /// What is wrong with it.
    pub message: String,
}

/// Failures while proxying a call to an origin API.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// unknown API '{service}'
    UnknownService {
        /// The API no fetcher is registered for.
        service: String,
    },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestHttpError {
        status_code: Option<u16>,

        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the serialization failed.
        reason: String,
    },

    /// {message}
    ///
    /// errors without a path reported by an origin API, they fail the whole call
    SubrequestGraphQLErrors {
        /// The service that reported the errors.
        service: String,

        /// All error messages, one per line.
        message: String,
    },

    /// batch request to '{service}' failed: {reason}
    SubrequestBatchingError {
        /// The service the batch was sent to.
        service: String,

        /// The reason the batch failed.
        reason: String,
    },

    /// invalid argument '{name}': {reason}
    InvalidArgument {
        /// The argument or variable.
        name: String,

        /// Why it could not be sent.
        reason: String,
    },
}

impl FetchError {
    /// Convert the error to a GraphQL error located at `path`.
    pub fn to_graphql_error(&self, path: Option<Path>) -> graphql::Error {
        let mut value: Value = serde_json_bytes::to_value(self).unwrap_or_default();
        let mut extensions = value.as_object_mut().map(std::mem::take).unwrap_or_default();
        extensions
            .entry("code")
            .or_insert_with(|| self.extension_code().into());
        match self {
            FetchError::SubrequestHttpError {
                status_code,
                service,
                ..
            } => {
                extensions.remove("status_code");
                extensions
                    .entry("service")
                    .or_insert_with(|| service.clone().into());
                if let Some(status_code) = status_code {
                    extensions.insert("http", serde_json_bytes::json!({ "status": status_code }));
                }
            }
            FetchError::SubrequestGraphQLErrors { .. } => {
                extensions.remove("message");
            }
            _ => {}
        }

        graphql::Error {
            message: self.to_string(),
            locations: Default::default(),
            path,
            extensions,
        }
    }

    pub fn extension_code(&self) -> String {
        match self {
            FetchError::UnknownService { .. } => "UNKNOWN_SERVICE",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestGraphQLErrors { .. } => "SUBREQUEST_GRAPHQL_ERRORS",
            FetchError::SubrequestBatchingError { .. } => "SUBREQUEST_BATCHING_ERROR",
            FetchError::InvalidArgument { .. } => "INVALID_ARGUMENT",
        }
        .to_string()
    }
}

/// Failures while loading a [`Configuration`](crate::Configuration).
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not parse configuration: {0}
    Parse(String),

    /// undefined reference type '{kind}' in '{reference}', only 'env' references are supported
    UnsupportedReference {
        /// The reference prefix, e.g. `file` in `${file:x}`.
        kind: String,
        /// The whole reference.
        reference: String,
    },

    /// missing environment variable name in '{reference}'
    MissingReferenceName {
        /// The whole reference.
        reference: String,
    },

    /// environment variable '{name}' is not defined
    UndefinedEnvironmentVariable {
        /// The variable name.
        name: String,
    },

    /// no schema was supplied for API '{api}'
    MissingSchema {
        /// The configured API.
        api: String,
    },

    /// invalid header '{header}' for API '{api}': {reason}
    InvalidHeader {
        /// The configured API.
        api: String,
        /// The header name.
        header: String,
        /// Why it was rejected.
        reason: String,
    },

    /// could not create HTTP client for API '{api}': {reason}
    HttpClient {
        /// The configured API.
        api: String,
        /// Why it failed.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn http_error_extensions() {
        let error = FetchError::SubrequestHttpError {
            status_code: Some(502),
            service: "products".to_string(),
            reason: "bad gateway".to_string(),
        }
        .to_graphql_error(None);
        assert_eq!(
            error.message,
            "HTTP fetch failed from 'products': bad gateway"
        );
        assert_eq!(error.extensions.get("code"), Some(&json!("SUBREQUEST_HTTP_ERROR")));
        assert_eq!(error.extensions.get("http"), Some(&json!({ "status": 502 })));
        assert_eq!(error.extensions.get("status_code"), None);
    }

    #[test]
    fn graphql_errors_keep_message_out_of_extensions() {
        let error = FetchError::SubrequestGraphQLErrors {
            service: "test".to_string(),
            message: "first\nsecond".to_string(),
        }
        .to_graphql_error(Some(Path::from_iter(["foo"])));
        assert_eq!(error.message, "first\nsecond");
        assert_eq!(error.path, Some(Path::from_iter(["foo"])));
        assert_eq!(error.extensions.get("service"), Some(&json!("test")));
        assert_eq!(error.extensions.get("message"), None);
    }
}
