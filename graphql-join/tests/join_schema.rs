use apollo_compiler::Schema;
use apollo_compiler::schema::ExtendedType;
use graphql_join::Configuration;
use graphql_join::JoinError;
use graphql_join::JoinSchema;
use graphql_join::RemoteSchema;
use graphql_join::RemoteSchemas;
use indexmap::IndexMap;
use pretty_assertions::assert_eq;

use crate::common::API_A;
use crate::common::API_B;
use crate::common::JOIN_IDL;
use crate::common::test_harness;

fn schema(sdl: &str) -> apollo_compiler::validation::Valid<Schema> {
    Schema::parse_and_validate(sdl, "origin.graphql").unwrap()
}

#[test]
fn joined_schema_exposes_join_and_imported_types_only() {
    let harness = test_harness();
    let schema = harness.join.schema();

    let Some(ExtendedType::Object(test_type)) = schema.types.get("TestType") else {
        panic!("TestType should be imported");
    };
    let fields: Vec<_> = test_type.fields.keys().map(|name| name.as_str()).collect();
    assert_eq!(
        fields,
        ["id", "foo", "failing", "failRequired", "bar", "brokenBar"]
    );
    let printed = schema.to_string();
    for join_only in ["resolveWith", "@send", "@export", "CLIENT_SELECTION", "FooArg"] {
        assert!(!printed.contains(join_only), "{join_only} leaked:\n{printed}");
    }
    assert_eq!(
        harness.join.type_origins("TestType").map(|origins| origins.keys().cloned().collect::<Vec<_>>()),
        Some(vec!["a".to_string()])
    );
    assert!(harness.join.resolve_with("TestType", "bar").is_some());
    assert!(harness.join.resolve_with("TestType", "foo").is_none());
}

#[test]
fn prefixed_types_are_referenced_by_their_prefixed_name() {
    let remotes: RemoteSchemas = [(
        "px".to_string(),
        RemoteSchema::with_prefix(
            schema(
                "type Query { bar: Bar } interface Node { id: ID! } type Bar implements Node { id: ID! next(after: Cursor): [Bar!] } input Cursor { value: String }",
            ),
            "Px_",
        ),
    )]
    .into_iter()
    .collect();
    let join = JoinSchema::parse(
        r#"
        schema { query: Query }
        type Query { bar: Px_Bar @resolveWith(query: "bar") }
        query bar @send(to: "px") { bar { ...CLIENT_SELECTION } }
        "#,
        &remotes,
    )
    .unwrap();

    let printed = join.schema().to_string();
    assert!(printed.contains("type Px_Bar implements Px_Node"), "{printed}");
    assert!(printed.contains("next(after: Px_Cursor): [Px_Bar!]"), "{printed}");
    assert!(printed.contains("id: ID!"), "{printed}");
    assert!(!printed.contains("type Bar"), "{printed}");
}

#[test]
fn unknown_send_target_is_rejected() {
    let remotes: RemoteSchemas = [("a".to_string(), RemoteSchema::new(schema(API_A)))]
        .into_iter()
        .collect();
    let error = JoinSchema::parse(JOIN_IDL, &remotes).unwrap_err();
    assert!(
        matches!(error, JoinError::UnknownApi { ref api, .. } if api == "b"),
        "{error}"
    );
}

#[test]
fn conflicting_definitions_are_rejected() {
    let remotes: RemoteSchemas = [
        ("a".to_string(), RemoteSchema::new(schema("type Query { s: Shared } type Shared { x: Int }"))),
        ("b".to_string(), RemoteSchema::new(schema("type Query { s: Shared } type Shared { x: String }"))),
    ]
    .into_iter()
    .collect();
    let error = JoinSchema::parse(
        r#"
        schema { query: Query }
        type Query {
          one: Shared @resolveWith(query: "one")
          two: Shared @resolveWith(query: "two")
        }
        query one @send(to: "a") { s { ...CLIENT_SELECTION } }
        query two @send(to: "b") { s { ...CLIENT_SELECTION } }
        "#,
        &remotes,
    )
    .unwrap_err();
    assert!(
        matches!(error, JoinError::TypeConflict { ref type_name, .. } if type_name == "Shared"),
        "{error}"
    );
}

#[test]
fn configuration_drives_the_join() {
    let configuration = Configuration::from_yaml(&format!(
        r#"
apis:
  a:
    url: http://a.example.com/graphql
  b:
    url: http://b.example.com/graphql
    timeout: 2s
joinIDL: |
{}
"#,
        JOIN_IDL
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    ))
    .unwrap();
    let schemas: IndexMap<String, _> = [
        ("a".to_string(), schema(API_A)),
        ("b".to_string(), schema(API_B)),
    ]
    .into_iter()
    .collect();

    let join = JoinSchema::parse(
        &configuration.join_idl,
        &configuration.remote_schemas(schemas).unwrap(),
    )
    .unwrap();
    assert!(join.resolve_with("Query", "test").is_some());
    let fetchers = configuration.fetchers().unwrap();
    assert_eq!(fetchers.keys().collect::<Vec<_>>(), ["a", "b"]);
}
