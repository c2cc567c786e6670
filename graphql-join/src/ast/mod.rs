//! Document and schema utilities used to assemble the joined schema.

pub mod value;
pub mod visitor;

use std::collections::VecDeque;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;

pub use self::value::VariableTypes;
pub use self::value::json_to_value;
pub use self::value::substitute_variables;
pub use self::value::value_to_json;
use self::visitor::rename_type_references;
use self::visitor::type_references;
use crate::error::FetchError;
use crate::error::JoinError;

const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];
const BUILTIN_DIRECTIVES: [&str; 5] = ["skip", "include", "deprecated", "specifiedBy", "oneOf"];

/// Whether `name` is a built-in scalar or an introspection type.
pub fn is_builtin_type(name: &str) -> bool {
    name.starts_with("__") || BUILTIN_SCALARS.contains(&name)
}

pub(crate) fn is_builtin_directive(name: &str) -> bool {
    BUILTIN_DIRECTIVES.contains(&name)
}

/// The definitions of a document, partitioned by kind.
#[derive(Debug, Default, Clone)]
pub struct SplitDocument {
    pub schema_definitions: Vec<Node<ast::SchemaDefinition>>,
    /// Type definitions keyed by type name, in document order.
    pub types: IndexMap<Name, ast::Definition>,
    /// Type and schema extensions.
    pub extensions: Vec<ast::Definition>,
    pub directive_definitions: Vec<Node<ast::DirectiveDefinition>>,
    pub operations: Vec<Node<ast::OperationDefinition>>,
    pub fragments: IndexMap<Name, Node<ast::FragmentDefinition>>,
}

/// Partitions `document` into schema definitions, type definitions, extensions,
/// directive definitions, operations and fragments.
pub fn split_document(document: &ast::Document) -> SplitDocument {
    let mut split = SplitDocument::default();
    for definition in &document.definitions {
        match definition {
            ast::Definition::SchemaDefinition(schema) => {
                split.schema_definitions.push(schema.clone())
            }
            ast::Definition::DirectiveDefinition(directive) => {
                split.directive_definitions.push(directive.clone())
            }
            ast::Definition::OperationDefinition(operation) => {
                split.operations.push(operation.clone())
            }
            ast::Definition::FragmentDefinition(fragment) => {
                split
                    .fragments
                    .insert(fragment.name.clone(), fragment.clone());
            }
            ast::Definition::ScalarTypeDefinition(_)
            | ast::Definition::ObjectTypeDefinition(_)
            | ast::Definition::InterfaceTypeDefinition(_)
            | ast::Definition::UnionTypeDefinition(_)
            | ast::Definition::EnumTypeDefinition(_)
            | ast::Definition::InputObjectTypeDefinition(_) => {
                if let Some(name) = definition.name() {
                    split.types.insert(name.clone(), definition.clone());
                }
            }
            ast::Definition::SchemaExtension(_)
            | ast::Definition::ScalarTypeExtension(_)
            | ast::Definition::ObjectTypeExtension(_)
            | ast::Definition::InterfaceTypeExtension(_)
            | ast::Definition::UnionTypeExtension(_)
            | ast::Definition::EnumTypeExtension(_)
            | ast::Definition::InputObjectTypeExtension(_) => {
                split.extensions.push(definition.clone())
            }
        }
    }
    split
}

/// Builds and validates a schema from a schema definition, type definitions,
/// directive definitions and extensions, extensions applied last.
pub fn merge_into_schema(
    schema_definition: Node<ast::SchemaDefinition>,
    types: impl IntoIterator<Item = ast::Definition>,
    directive_definitions: impl IntoIterator<Item = Node<ast::DirectiveDefinition>>,
    extensions: impl IntoIterator<Item = ast::Definition>,
) -> Result<Valid<Schema>, JoinError> {
    let mut document = ast::Document::new();
    document
        .definitions
        .push(ast::Definition::SchemaDefinition(schema_definition));
    document.definitions.extend(
        directive_definitions
            .into_iter()
            .map(ast::Definition::DirectiveDefinition),
    );
    document.definitions.extend(types);
    document.definitions.extend(extensions);
    document
        .to_schema_validate()
        .map_err(|invalid| JoinError::InvalidSchema(invalid.errors.to_string()))
}

/// Checks that `prefix` can start a GraphQL name.
pub fn validate_prefix(prefix: &str) -> Result<(), JoinError> {
    Name::new(&format!("{prefix}T")).map_err(|_| JoinError::InvalidName {
        name: prefix.to_string(),
    })?;
    Ok(())
}

/// Renames the type defined by `definition` and every named-type reference
/// inside it by prepending `prefix`. Built-in scalars keep their names.
pub fn prefix_type(definition: &ast::Definition, prefix: &str) -> Result<ast::Definition, JoinError> {
    validate_prefix(prefix)?;
    let mut definition = definition.clone();
    if prefix.is_empty() {
        return Ok(definition);
    }
    rename_type_references(&mut definition, &mut |name| {
        if is_builtin_type(name) {
            None
        } else {
            Name::new(&format!("{prefix}{name}")).ok()
        }
    });
    Ok(definition)
}

/// Transitive closure of named-type references in `type_map`, starting at `roots`.
///
/// The closure contains the roots that exist in `type_map`, everything they
/// reference, and every type implementing an interface of the closure.
pub fn types_with_dependencies(
    type_map: &IndexMap<Name, ast::Definition>,
    roots: impl IntoIterator<Item = Name>,
) -> IndexSet<Name> {
    let mut implementers: IndexMap<&Name, Vec<&Name>> = IndexMap::new();
    for (name, definition) in type_map {
        let interfaces = match definition {
            ast::Definition::ObjectTypeDefinition(object) => &object.implements_interfaces,
            ast::Definition::InterfaceTypeDefinition(interface) => {
                &interface.implements_interfaces
            }
            _ => continue,
        };
        for interface in interfaces {
            implementers.entry(interface).or_default().push(name);
        }
    }

    let mut closure = IndexSet::new();
    let mut queue: VecDeque<Name> = roots.into_iter().collect();
    while let Some(name) = queue.pop_front() {
        let Some(definition) = type_map.get(&name) else {
            continue;
        };
        if !closure.insert(name.clone()) {
            continue;
        }
        queue.extend(
            type_references(definition)
                .into_iter()
                .filter(|reference| !closure.contains(reference)),
        );
        if let Some(implementing) = implementers.get(&name) {
            queue.extend(implementing.iter().map(|&name| name.clone()));
        }
    }
    closure
}

/// Round-trips `schema` through SDL and returns its non-builtin type
/// definitions keyed by name.
///
/// Extensions are folded into the definitions they extend, and only built-in
/// directives are kept on the definitions.
pub fn schema_to_type_defs(schema: &Schema) -> Result<IndexMap<Name, ast::Definition>, JoinError> {
    let document = ast::Document::parse(schema.to_string(), "origin.graphql")
        .map_err(|invalid| JoinError::Parse(invalid.errors.to_string()))?;
    let split = split_document(&document);

    let mut types = split.types;
    types.retain(|name, _| !is_builtin_type(name));
    for extension in &split.extensions {
        fold_extension(&mut types, extension);
    }
    for definition in types.values_mut() {
        retain_builtin_directives(definition);
    }
    Ok(types)
}

fn fold_extension(types: &mut IndexMap<Name, ast::Definition>, extension: &ast::Definition) {
    let Some(definition) = extension.name().and_then(|name| types.get_mut(name)) else {
        return;
    };
    match (definition, extension) {
        (ast::Definition::ObjectTypeDefinition(def), ast::Definition::ObjectTypeExtension(ext)) => {
            let def = def.make_mut();
            def.implements_interfaces
                .extend(ext.implements_interfaces.iter().cloned());
            def.directives.0.extend(ext.directives.iter().cloned());
            def.fields.extend(ext.fields.iter().cloned());
        }
        (
            ast::Definition::InterfaceTypeDefinition(def),
            ast::Definition::InterfaceTypeExtension(ext),
        ) => {
            let def = def.make_mut();
            def.implements_interfaces
                .extend(ext.implements_interfaces.iter().cloned());
            def.directives.0.extend(ext.directives.iter().cloned());
            def.fields.extend(ext.fields.iter().cloned());
        }
        (ast::Definition::UnionTypeDefinition(def), ast::Definition::UnionTypeExtension(ext)) => {
            let def = def.make_mut();
            def.directives.0.extend(ext.directives.iter().cloned());
            def.members.extend(ext.members.iter().cloned());
        }
        (ast::Definition::EnumTypeDefinition(def), ast::Definition::EnumTypeExtension(ext)) => {
            let def = def.make_mut();
            def.directives.0.extend(ext.directives.iter().cloned());
            def.values.extend(ext.values.iter().cloned());
        }
        (
            ast::Definition::InputObjectTypeDefinition(def),
            ast::Definition::InputObjectTypeExtension(ext),
        ) => {
            let def = def.make_mut();
            def.directives.0.extend(ext.directives.iter().cloned());
            def.fields.extend(ext.fields.iter().cloned());
        }
        (ast::Definition::ScalarTypeDefinition(def), ast::Definition::ScalarTypeExtension(ext)) => {
            def.make_mut()
                .directives
                .0
                .extend(ext.directives.iter().cloned());
        }
        _ => {}
    }
}

fn retain_builtin(directives: &mut ast::DirectiveList) {
    directives
        .0
        .retain(|directive| is_builtin_directive(&directive.name));
}

fn retain_builtin_on_inputs(inputs: &mut [Node<ast::InputValueDefinition>]) {
    for input in inputs {
        retain_builtin(&mut input.make_mut().directives);
    }
}

fn retain_builtin_on_fields(fields: &mut [Node<ast::FieldDefinition>]) {
    for field in fields {
        let field = field.make_mut();
        retain_builtin(&mut field.directives);
        retain_builtin_on_inputs(&mut field.arguments);
    }
}

/// Drops every non-builtin directive usage from a type definition.
pub(crate) fn retain_builtin_directives(definition: &mut ast::Definition) {
    match definition {
        ast::Definition::ObjectTypeDefinition(def) => {
            let def = def.make_mut();
            retain_builtin(&mut def.directives);
            retain_builtin_on_fields(&mut def.fields);
        }
        ast::Definition::InterfaceTypeDefinition(def) => {
            let def = def.make_mut();
            retain_builtin(&mut def.directives);
            retain_builtin_on_fields(&mut def.fields);
        }
        ast::Definition::UnionTypeDefinition(def) => retain_builtin(&mut def.make_mut().directives),
        ast::Definition::ScalarTypeDefinition(def) => {
            retain_builtin(&mut def.make_mut().directives)
        }
        ast::Definition::EnumTypeDefinition(def) => {
            let def = def.make_mut();
            retain_builtin(&mut def.directives);
            for value in &mut def.values {
                retain_builtin(&mut value.make_mut().directives);
            }
        }
        ast::Definition::InputObjectTypeDefinition(def) => {
            let def = def.make_mut();
            retain_builtin(&mut def.directives);
            retain_builtin_on_inputs(&mut def.fields);
        }
        _ => {}
    }
}

/// The key a field's value is found under in a response.
pub fn response_key(field: &ast::Field) -> &Name {
    field.alias.as_ref().unwrap_or(&field.name)
}

/// Prepends `prefix` to the response key of every top-level field of
/// `selection_set`, looking through inline fragments.
pub fn prefix_top_level_fields(
    selection_set: &[ast::Selection],
    prefix: &str,
) -> Result<Vec<ast::Selection>, FetchError> {
    selection_set
        .iter()
        .map(|selection| match selection {
            ast::Selection::Field(field) => {
                let alias = format!("{prefix}{}", response_key(field));
                let alias = Name::new(&alias).map_err(|_| FetchError::InvalidArgument {
                    name: alias.clone(),
                    reason: "not a valid alias".to_string(),
                })?;
                let mut field = field.clone();
                field.make_mut().alias = Some(alias);
                Ok(ast::Selection::Field(field))
            }
            ast::Selection::InlineFragment(fragment) => {
                let mut fragment = fragment.clone();
                let inner = prefix_top_level_fields(&fragment.selection_set, prefix)?;
                fragment.make_mut().selection_set = inner;
                Ok(ast::Selection::InlineFragment(fragment))
            }
            ast::Selection::FragmentSpread(spread) => Err(FetchError::InvalidArgument {
                name: spread.fragment_name.to_string(),
                reason: "fragment spreads can not be namespaced".to_string(),
            }),
        })
        .collect()
}

/// Wraps a selection set into an anonymous operation document.
pub fn operation_document(
    operation_type: ast::OperationType,
    selection_set: Vec<ast::Selection>,
) -> ast::Document {
    let mut document = ast::Document::new();
    document
        .definitions
        .push(ast::Definition::OperationDefinition(Node::new(
            ast::OperationDefinition {
                operation_type,
                name: None,
                variables: Vec::new(),
                directives: ast::DirectiveList::default(),
                selection_set,
            },
        )));
    document
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;
    use pretty_assertions::assert_eq;

    use super::*;

    fn type_map(sdl: &str) -> IndexMap<Name, ast::Definition> {
        let schema = Schema::parse_and_validate(sdl, "test.graphql").unwrap();
        schema_to_type_defs(&schema).unwrap()
    }

    #[test]
    fn splits_document_by_kind() {
        let document = ast::Document::parse(
            r#"
            schema { query: Query }
            directive @local on FIELD
            type Query { foo: Foo }
            scalar Foo
            extend type Query { bar: String }
            query foo @send(to: "test") { foo }
            fragment Frag on Query { foo }
            "#,
            "join.graphql",
        )
        .unwrap();
        let split = split_document(&document);
        assert_eq!(split.schema_definitions.len(), 1);
        assert_eq!(split.directive_definitions.len(), 1);
        assert_eq!(
            split.types.keys().collect::<Vec<_>>(),
            vec![&name!("Query"), &name!("Foo")]
        );
        assert_eq!(split.extensions.len(), 1);
        assert_eq!(split.operations.len(), 1);
        assert!(split.fragments.contains_key("Frag"));
    }

    #[test]
    fn prefixes_every_reference_except_builtins() {
        let types = type_map(
            r#"
            type Query { foo(arg: Input, id: ID): BarOrBaz }
            interface Node { id: ID! }
            type Bar implements Node { id: ID! bar: [String!] }
            type Baz { baz: Int }
            union BarOrBaz = Bar | Baz
            input Input { nested: Input value: Float }
            "#,
        );
        let printed = types
            .values()
            .map(|definition| prefix_type(definition, "Px_").unwrap().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let expected = ast::Document::parse(
            r#"
            type Px_Query { foo(arg: Px_Input, id: ID): Px_BarOrBaz }
            interface Px_Node { id: ID! }
            type Px_Bar implements Px_Node { id: ID! bar: [String!] }
            type Px_Baz { baz: Int }
            union Px_BarOrBaz = Px_Bar | Px_Baz
            input Px_Input { nested: Px_Input value: Float }
            "#,
            "expected.graphql",
        )
        .unwrap();
        assert_eq!(
            printed,
            expected
                .definitions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        );
    }

    #[test]
    fn rejects_invalid_prefix() {
        assert!(matches!(
            validate_prefix("1st_"),
            Err(JoinError::InvalidName { .. })
        ));
        assert!(validate_prefix("").is_ok());
    }

    #[test]
    fn dependency_closure_includes_roots_references_and_implementers() {
        let types = type_map(
            r#"
            type Query { node: Node unrelated: Unrelated }
            interface Node { id: ID! }
            type Bar implements Node { id: ID! baz: Baz }
            type Baz { value: String }
            type Unrelated { value: String }
            "#,
        );
        let closure = types_with_dependencies(&types, [name!("Node"), name!("Missing")]);
        assert_eq!(
            closure.into_iter().collect::<Vec<_>>(),
            vec![name!("Node"), name!("Bar"), name!("Baz")]
        );
    }

    #[test]
    fn schema_round_trip_folds_extensions_and_drops_custom_directives() {
        let types = type_map(
            r#"
            directive @custom on FIELD_DEFINITION
            type Query { foo: String @custom old: String @deprecated(reason: "no") }
            extend type Query { bar: Int }
            "#,
        );
        assert_eq!(types.len(), 1);
        let query = types.get("Query").unwrap().to_string();
        let expected = ast::Document::parse(
            r#"type Query { foo: String old: String @deprecated(reason: "no") bar: Int }"#,
            "expected.graphql",
        )
        .unwrap();
        assert_eq!(query, expected.definitions[0].to_string());
    }

    #[test]
    fn namespaces_top_level_fields() {
        let document =
            ast::Document::parse("{ foo alias: bar { baz } ... on Query { qux } }", "q.graphql")
                .unwrap();
        let ast::Definition::OperationDefinition(operation) = &document.definitions[0] else {
            panic!("expected an operation");
        };
        let prefixed = prefix_top_level_fields(&operation.selection_set, "_0_").unwrap();
        let printed = operation_document(ast::OperationType::Query, prefixed).to_string();
        let expected =
            ast::Document::parse("{ _0_foo: foo _0_alias: bar { baz } ... on Query { _0_qux: qux } }", "e.graphql")
                .unwrap();
        assert_eq!(printed, expected.to_string());
    }
}
