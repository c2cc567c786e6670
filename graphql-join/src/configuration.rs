//! Configuration of the joined APIs.
//!
//! The configuration is YAML. String values may reference environment
//! variables as `${env:NAME}`; a reference preceded by a backslash is kept
//! as written.

#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use indexmap::IndexMap;
use regex::Captures;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::ConfigurationError;
use crate::fetcher::Fetcher;
use crate::fetcher::Fetchers;
use crate::fetcher::HttpFetcher;
use crate::schema::RemoteSchema;
use crate::schema::RemoteSchemas;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\\?)\$\{([^}]*)\}").expect("reference pattern is valid"));

/// The joined APIs and the join IDL.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Origin APIs keyed by the name `@send(to:)` refers to.
    pub apis: IndexMap<String, ApiConfiguration>,

    /// The join IDL.
    #[serde(rename = "joinIDL")]
    pub join_idl: String,
}

/// One origin API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ApiConfiguration {
    /// GraphQL endpoint of the API.
    pub url: Url,

    /// Prefix added to every type imported from this API.
    #[serde(default)]
    pub prefix: Option<String>,

    /// Headers sent with every request to this API.
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    /// Per-request timeout, e.g. `30s`.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Configuration {
    /// Parses `yaml`, expanding environment references first.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        Self::from_yaml_with(yaml, &Expansion::default())
    }

    fn from_yaml_with(yaml: &str, expansion: &Expansion) -> Result<Self, ConfigurationError> {
        let raw: Value =
            serde_yaml::from_str(yaml).map_err(|error| ConfigurationError::Parse(error.to_string()))?;
        let expanded = expansion.expand(raw)?;
        serde_json::from_value(expanded).map_err(|error| ConfigurationError::Parse(error.to_string()))
    }

    /// One HTTP transport per configured API.
    pub fn fetchers(&self) -> Result<Fetchers, ConfigurationError> {
        self.apis
            .iter()
            .map(|(api, config)| {
                let fetcher = HttpFetcher::builder()
                    .service(api.clone())
                    .url(config.url.clone())
                    .headers(config.header_map(api)?)
                    .and_timeout(config.timeout)
                    .build()?;
                Ok((api.clone(), Arc::new(fetcher) as Arc<dyn Fetcher>))
            })
            .collect()
    }

    /// Pairs the origin schemas, obtained by the caller, with the configured
    /// prefixes. Every configured API needs a schema.
    pub fn remote_schemas(
        &self,
        mut schemas: IndexMap<String, Valid<Schema>>,
    ) -> Result<RemoteSchemas, ConfigurationError> {
        let remote_schemas = self
            .apis
            .iter()
            .map(|(api, config)| {
                let schema = schemas
                    .shift_remove(api)
                    .ok_or_else(|| ConfigurationError::MissingSchema { api: api.clone() })?;
                Ok((
                    api.clone(),
                    RemoteSchema {
                        schema,
                        prefix: config.prefix.clone(),
                    },
                ))
            })
            .collect::<Result<RemoteSchemas, _>>()?;
        for api in schemas.keys() {
            tracing::warn!(api = %api, "ignoring the schema of an API that is not configured");
        }
        Ok(remote_schemas)
    }
}

impl ApiConfiguration {
    fn header_map(&self, api: &str) -> Result<HeaderMap, ConfigurationError> {
        let invalid = |header: &str, reason: String| ConfigurationError::InvalidHeader {
            api: api.to_string(),
            header: header.to_string(),
            reason,
        };
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|error| invalid(name, error.to_string()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|error| invalid(name, error.to_string()))?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }
}

/// Expands `${env:NAME}` references in every string of a configuration.
#[derive(Clone, Default)]
struct Expansion {
    #[cfg(test)]
    mocked_env_vars: HashMap<String, String>,
}

impl Expansion {
    fn expand(&self, mut configuration: Value) -> Result<Value, ConfigurationError> {
        self.visit(&mut configuration)?;
        Ok(configuration)
    }

    fn visit(&self, value: &mut Value) -> Result<(), ConfigurationError> {
        match value {
            Value::String(text) => {
                let expanded = self.expand_string(text)?;
                *text = expanded;
            }
            Value::Array(items) => {
                for item in items {
                    self.visit(item)?;
                }
            }
            Value::Object(fields) => {
                for field in fields.values_mut() {
                    self.visit(field)?;
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        Ok(())
    }

    fn expand_string(&self, text: &str) -> Result<String, ConfigurationError> {
        let mut expanded = String::with_capacity(text.len());
        let mut last = 0;
        for captures in REFERENCE.captures_iter(text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            expanded.push_str(&text[last..whole.start()]);
            last = whole.end();
            if is_escaped(&captures) {
                expanded.push_str(whole.as_str());
            } else {
                expanded.push_str(&self.resolve(&captures[2], whole.as_str())?);
            }
        }
        expanded.push_str(&text[last..]);
        Ok(expanded)
    }

    fn resolve(&self, reference: &str, whole: &str) -> Result<String, ConfigurationError> {
        let (kind, name) = reference.split_once(':').unwrap_or((reference, ""));
        let kind = kind.trim();
        if kind != "env" {
            return Err(ConfigurationError::UnsupportedReference {
                kind: kind.to_string(),
                reference: whole.to_string(),
            });
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::MissingReferenceName {
                reference: whole.to_string(),
            });
        }
        self.get_env(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigurationError::UndefinedEnvironmentVariable {
                name: name.to_string(),
            })
    }

    fn get_env(&self, name: &str) -> Option<String> {
        #[cfg(test)]
        if let Some(value) = self.mocked_env_vars.get(name) {
            return Some(value.clone());
        }
        env::var(name).ok()
    }
}

fn is_escaped(captures: &Captures<'_>) -> bool {
    captures.get(1).is_some_and(|escape| !escape.as_str().is_empty())
}
