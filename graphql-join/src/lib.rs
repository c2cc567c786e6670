//! Joins several independent GraphQL APIs into one schema.
//!
//! A join IDL declares the client-facing types and, with `@resolveWith`,
//! which origin operation resolves a field. Types the join IDL refers to are
//! imported from the origin schemas, optionally prefixed. Client queries are
//! validated against the joined schema and split into proxy calls that are
//! batched per origin API.
//!
//! ```no_run
//! # async fn example(yaml: &str, schemas: indexmap::IndexMap<String, apollo_compiler::validation::Valid<apollo_compiler::Schema>>) -> Result<(), Box<dyn std::error::Error>> {
//! use graphql_join::Configuration;
//! use graphql_join::JoinSchema;
//! use graphql_join::graphql;
//!
//! let configuration = Configuration::from_yaml(yaml)?;
//! let join = JoinSchema::parse(&configuration.join_idl, &configuration.remote_schemas(schemas)?)?;
//! let fetchers = configuration.fetchers()?;
//! let request = graphql::Request::builder().query("{ me { name } }").build();
//! let response = join.execute(&fetchers, &request).await;
//! # Ok(())
//! # }
//! ```

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod ast;
pub mod batching;
pub mod configuration;
pub mod directives;
pub mod error;
mod execution;
pub mod fetcher;
pub mod graphql;
pub mod json_ext;
pub mod plan;
pub mod response;
mod rewrite;
pub mod schema;

pub use crate::configuration::ApiConfiguration;
pub use crate::configuration::Configuration;
pub use crate::directives::JoinDirectives;
pub use crate::error::ConfigurationError;
pub use crate::error::FetchError;
pub use crate::error::JoinError;
pub use crate::fetcher::Fetcher;
pub use crate::fetcher::Fetchers;
pub use crate::fetcher::HttpFetcher;
pub use crate::schema::JoinSchema;
pub use crate::schema::RemoteSchema;
pub use crate::schema::RemoteSchemas;
