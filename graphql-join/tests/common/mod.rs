//! Fake origin APIs and a harness joining them.

use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::resolvers::Execution;
use apollo_compiler::resolvers::FieldError;
use apollo_compiler::resolvers::ObjectValue;
use apollo_compiler::resolvers::ResolveInfo;
use apollo_compiler::resolvers::ResolvedValue;
use apollo_compiler::response::JsonValue;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use graphql_join::FetchError;
use graphql_join::Fetcher;
use graphql_join::Fetchers;
use graphql_join::JoinSchema;
use graphql_join::RemoteSchema;
use graphql_join::RemoteSchemas;
use graphql_join::graphql;
use graphql_join::json_ext::Object;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// An origin API answering every valid document from its schema alone.
///
/// Leaves read `<api>:<Type>.<field>`, followed by the field arguments as
/// JSON when there are any. Lists hold two items and abstract types resolve
/// to their first possible type. Fields whose name starts with `fail` fail.
pub(crate) struct FakeOrigin {
    api: String,
    schema: Valid<Schema>,
    documents: Mutex<Vec<String>>,
}

impl FakeOrigin {
    pub(crate) fn new(api: &str, sdl: &str) -> Arc<Self> {
        Arc::new(Self {
            api: api.to_string(),
            schema: Schema::parse_and_validate(sdl, format!("{api}.graphql")).unwrap(),
            documents: Default::default(),
        })
    }

    /// Every document received so far, printed on one line.
    pub(crate) fn documents(&self) -> Vec<String> {
        self.documents.lock().clone()
    }
}

#[async_trait]
impl Fetcher for FakeOrigin {
    async fn fetch(
        &self,
        document: &ast::Document,
        variables: &Object,
    ) -> Result<graphql::Response, FetchError> {
        let query = document.serialize().no_indent().to_string();
        self.documents.lock().push(query.clone());

        let document =
            ExecutableDocument::parse_and_validate(&self.schema, &query, "origin.graphql")
                .unwrap_or_else(|invalid| {
                    panic!(
                        "{} received an invalid document `{query}`:\n{}",
                        self.api, invalid.errors
                    )
                });
        let operation = document.operations.get(None).unwrap();
        let root = Generated {
            origin: self,
            type_name: operation.selection_set.ty.clone(),
        };
        let response = Execution::new(&self.schema, &document)
            .operation(operation)
            .raw_variable_values(variables)
            .execute_sync(&root)
            .unwrap_or_else(|error| {
                panic!(
                    "{} could not execute `{query}`: {}",
                    self.api,
                    error.to_graphql_error(&document.sources).message
                )
            });
        Ok(graphql::Response::builder()
            .data(JsonValue::from(response.data))
            .errors(response.errors.into_iter().map(Into::into).collect())
            .build())
    }
}

struct Generated<'a> {
    origin: &'a FakeOrigin,
    type_name: Name,
}

impl ObjectValue for Generated<'_> {
    fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    fn resolve_field<'a>(
        &'a self,
        info: &'a ResolveInfo<'a>,
    ) -> Result<ResolvedValue<'a>, FieldError> {
        let field_name = info.field_name();
        if field_name.starts_with("fail") {
            return Err(FieldError {
                message: format!("{}.{field_name} failed", self.type_name),
            });
        }
        let mut leaf = format!("{}:{}.{field_name}", self.origin.api, self.type_name);
        if !info.arguments().is_empty() {
            leaf.push('(');
            leaf.push_str(&serde_json::to_string(info.arguments()).unwrap());
            leaf.push(')');
        }
        self.generate(&info.field_definition().ty, &leaf)
    }
}

impl<'o> Generated<'o> {
    fn generate<'a>(&'a self, ty: &ast::Type, leaf: &str) -> Result<ResolvedValue<'a>, FieldError>
    where
        'o: 'a,
    {
        let name = match ty {
            ast::Type::List(item) | ast::Type::NonNullList(item) => {
                let items: Vec<_> = (0..2).map(|_| self.generate(item, leaf)).collect();
                return Ok(ResolvedValue::List(Box::new(items.into_iter())));
            }
            ast::Type::Named(name) | ast::Type::NonNullNamed(name) => name,
        };
        let types = &self.origin.schema.types;
        let object_type = match types.get(name) {
            Some(ExtendedType::Object(_)) => Some(name.clone()),
            Some(ExtendedType::Interface(_)) => {
                types
                    .iter()
                    .find_map(|(type_name, definition)| match definition {
                        ExtendedType::Object(object)
                            if object
                                .implements_interfaces
                                .iter()
                                .any(|interface| interface.name == *name) =>
                        {
                            Some(type_name.clone())
                        }
                        _ => None,
                    })
            }
            Some(ExtendedType::Union(union_type)) => union_type
                .members
                .first()
                .map(|member| member.name.clone()),
            Some(ExtendedType::Enum(enum_type)) => {
                let value = enum_type.values.keys().next().map(|value| value.as_str());
                return Ok(ResolvedValue::leaf(JsonValue::from(value.unwrap_or_default())));
            }
            _ => {
                return Ok(ResolvedValue::leaf(match name.as_str() {
                    "Int" => JsonValue::from(1),
                    "Float" => JsonValue::from(1.5),
                    "Boolean" => JsonValue::from(true),
                    _ => JsonValue::from(leaf),
                }));
            }
        };
        let type_name = object_type.ok_or_else(|| FieldError {
            message: format!("`{name}` has no possible type"),
        })?;
        Ok(ResolvedValue::object(Generated {
            origin: self.origin,
            type_name,
        }))
    }
}

/// An origin API that cannot be reached.
pub(crate) struct Unavailable(pub(crate) &'static str);

#[async_trait]
impl Fetcher for Unavailable {
    async fn fetch(
        &self,
        _document: &ast::Document,
        _variables: &Object,
    ) -> Result<graphql::Response, FetchError> {
        Err(FetchError::SubrequestHttpError {
            status_code: Some(503),
            service: self.0.to_string(),
            reason: "Service Unavailable".to_string(),
        })
    }
}

/// A joined schema over fake origins.
pub(crate) struct Harness {
    pub(crate) join: JoinSchema,
    origins: IndexMap<String, Arc<FakeOrigin>>,
    fetchers: Fetchers,
}

impl Harness {
    /// Joins `origins`, given as `(api, prefix, sdl)`.
    pub(crate) fn new(join_idl: &str, origins: &[(&str, Option<&str>, &str)]) -> Self {
        let mut remote_schemas = RemoteSchemas::new();
        let mut fake_origins = IndexMap::new();
        let mut fetchers = Fetchers::new();
        for (api, prefix, sdl) in origins {
            let origin = FakeOrigin::new(api, sdl);
            let remote = match prefix {
                Some(prefix) => RemoteSchema::with_prefix(origin.schema.clone(), *prefix),
                None => RemoteSchema::new(origin.schema.clone()),
            };
            remote_schemas.insert(api.to_string(), remote);
            fetchers.insert(api.to_string(), origin.clone() as Arc<dyn Fetcher>);
            fake_origins.insert(api.to_string(), origin);
        }
        let join = JoinSchema::parse(join_idl, &remote_schemas)
            .unwrap_or_else(|error| panic!("could not join schemas: {error}"));
        Self {
            join,
            origins: fake_origins,
            fetchers,
        }
    }

    /// Routes the calls to `api` to `fetcher` instead of the fake origin.
    pub(crate) fn with_fetcher(mut self, api: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.insert(api.to_string(), fetcher);
        self
    }

    pub(crate) async fn execute(&self, query: &str) -> graphql::Response {
        self.execute_with(query, serde_json_bytes::json!({})).await
    }

    pub(crate) async fn execute_with(
        &self,
        query: &str,
        variables: serde_json_bytes::Value,
    ) -> graphql::Response {
        let request = graphql::Request::builder()
            .query(query)
            .variables(variables.as_object().cloned().unwrap_or_default())
            .build();
        self.join.execute(&self.fetchers, &request).await
    }

    /// The documents the fake origin `api` received.
    pub(crate) fn documents(&self, api: &str) -> Vec<String> {
        self.origins[api].documents()
    }
}

/// `a` owns `TestType`, `b` resolves `TestType.bar` from a value of `a`.
pub(crate) const API_A: &str = r#"
type Query {
  foo: String
  echo(text: String): String
  test: TestType
  tests: [TestType!]
}
type Mutation { setFoo(value: String!): TestType }
type TestType {
  id: ID!
  foo: String
  failing: String
  failRequired: String!
}
"#;

pub(crate) const API_B: &str = "type Query { bar(fooArg: String): String }";

pub(crate) const JOIN_IDL: &str = r#"
schema { query: Query mutation: Mutation }
type Query {
  foo: String @resolveWith(query: "foo")
  echo(text: String = "hello"): String @resolveWith(query: "echo")
  test: TestType @resolveWith(query: "test")
  tests: [TestType!] @resolveWith(query: "tests")
}
type Mutation {
  setFoo(value: String!): TestType @resolveWith(query: "setFoo")
}
extend type TestType {
  bar: String @resolveWith(query: "bar", extraArgs: { fromFragment: "FooArg" })
  brokenBar: String @resolveWith(query: "bar", extraArgs: { fromFragment: "FailingArg" })
}
query foo @send(to: "a") { foo }
query echo($text: String) @send(to: "a") { echo(text: $text) }
query test @send(to: "a") { test { ...CLIENT_SELECTION } }
query tests @send(to: "a") { tests { ...CLIENT_SELECTION } }
query bar($fooArg: String) @send(to: "b") { bar(fooArg: $fooArg) }
mutation setFoo($value: String!) @send(to: "a") { setFoo(value: $value) { ...CLIENT_SELECTION } }
fragment FooArg on TestType { foo @export(as: "fooArg") }
fragment FailingArg on TestType { failing @export(as: "fooArg") }
"#;

pub(crate) fn test_harness() -> Harness {
    Harness::new(JOIN_IDL, &[("a", None, API_A), ("b", None, API_B)])
}
