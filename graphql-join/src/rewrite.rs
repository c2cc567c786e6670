//! Rewrites client selections into selections an origin API can answer.
//!
//! The rewritten selection set is expressed in the origin's type names. Every
//! field the client asked for is aliased with `___a_` so that the
//! fields injected here (`__typename` markers, arguments fragments) can never
//! clash with a client alias. Fields the join schema resolves through their
//! own plan are left out and fetched by a separate call.

use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::name;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;

use crate::ast::VariableTypes;
use crate::ast::value::is_included;
use crate::ast::value::substitute_arguments;
use crate::error::FetchError;
use crate::json_ext::Object;
use crate::plan::ArgumentsFragment;
use crate::plan::prefixed_alias;
use crate::plan::typename_alias;
use crate::schema::JoinSchema;

/// Rewrites the selections of one client document for one origin API.
pub(crate) struct QueryRewriter<'a> {
    join: &'a JoinSchema,
    document: &'a ExecutableDocument,
    /// Coerced client variables, inlined into the rewritten arguments.
    variables: &'a Object,
    variable_types: VariableTypes<'a>,
    api: &'a str,
}

type ArgumentsFragments = IndexMap<Name, Arc<ArgumentsFragment>>;

impl<'a> QueryRewriter<'a> {
    pub(crate) fn new(
        join: &'a JoinSchema,
        document: &'a ExecutableDocument,
        operation: &'a executable::Operation,
        variables: &'a Object,
        api: &'a str,
    ) -> Self {
        Self {
            join,
            document,
            variables,
            variable_types: VariableTypes::new(&operation.variables, join.schema()),
            api,
        }
    }

    /// The merged sub-selection of `fields`, all sharing one response key,
    /// rewritten for the origin. `None` for leaf fields.
    pub(crate) fn rewrite_field_selection(
        &self,
        fields: &[&Node<executable::Field>],
    ) -> Result<Option<Vec<ast::Selection>>, FetchError> {
        let Some(first) = fields.first() else {
            return Ok(None);
        };
        if first.selection_set.selections.is_empty() {
            return Ok(None);
        }
        let mut rewritten = Vec::new();
        let mut arguments_fragments = ArgumentsFragments::new();
        for field in fields {
            self.rewrite_into(&field.selection_set, &mut rewritten, &mut arguments_fragments)?;
        }
        self.finish(
            &first.selection_set.ty,
            rewritten,
            arguments_fragments,
        )
        .map(Some)
    }

    fn rewrite_selection_set(
        &self,
        selection_set: &executable::SelectionSet,
    ) -> Result<Vec<ast::Selection>, FetchError> {
        let mut rewritten = Vec::new();
        let mut arguments_fragments = ArgumentsFragments::new();
        self.rewrite_into(selection_set, &mut rewritten, &mut arguments_fragments)?;
        self.finish(&selection_set.ty, rewritten, arguments_fragments)
    }

    fn rewrite_into(
        &self,
        selection_set: &executable::SelectionSet,
        rewritten: &mut Vec<ast::Selection>,
        arguments_fragments: &mut ArgumentsFragments,
    ) -> Result<(), FetchError> {
        for selection in &selection_set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    if !is_included(&field.directives, self.variables)
                        || field.name.starts_with("__")
                    {
                        continue;
                    }
                    if let Some(plan) = self.join.resolve_with(&selection_set.ty, &field.name) {
                        if let Some(fragment) = &plan.arguments_fragment {
                            arguments_fragments
                                .entry(fragment.name().clone())
                                .or_insert_with(|| fragment.clone());
                        }
                        continue;
                    }
                    merge_field(rewritten, self.rewrite_field(field)?);
                }
                executable::Selection::InlineFragment(fragment) => {
                    if !is_included(&fragment.directives, self.variables) {
                        continue;
                    }
                    self.rewrite_fragment(
                        fragment.type_condition.as_ref(),
                        &fragment.selection_set,
                        rewritten,
                        arguments_fragments,
                    )?;
                }
                executable::Selection::FragmentSpread(spread) => {
                    if !is_included(&spread.directives, self.variables) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name) else {
                        continue;
                    };
                    self.rewrite_fragment(
                        Some(fragment.type_condition()),
                        &fragment.selection_set,
                        rewritten,
                        arguments_fragments,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn rewrite_field(&self, field: &executable::Field) -> Result<ast::Field, FetchError> {
        let selection_set = if field.selection_set.selections.is_empty() {
            Vec::new()
        } else {
            self.rewrite_selection_set(&field.selection_set)?
        };
        Ok(ast::Field {
            alias: Some(alias(prefixed_alias(field.response_key()))?),
            name: field.name.clone(),
            arguments: substitute_arguments(
                &field.arguments,
                self.variables,
                &self.variable_types,
            )?,
            directives: Default::default(),
            selection_set,
        })
    }

    /// Inlines a fragment, typed to the origin's name for its type condition.
    /// Fragments on types the origin does not provide are dropped.
    fn rewrite_fragment(
        &self,
        type_condition: Option<&Name>,
        selection_set: &executable::SelectionSet,
        rewritten: &mut Vec<ast::Selection>,
        arguments_fragments: &mut ArgumentsFragments,
    ) -> Result<(), FetchError> {
        let Some(type_condition) = type_condition else {
            return self.rewrite_into(selection_set, rewritten, arguments_fragments);
        };
        let Some(origin_type) = self.join.origin_type_name(self.api, type_condition) else {
            return Ok(());
        };
        let mut inner = Vec::new();
        self.rewrite_into(selection_set, &mut inner, arguments_fragments)?;
        if !inner.is_empty() {
            rewritten.push(ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                type_condition: Some(origin_type),
                directives: Default::default(),
                selection_set: inner,
            })));
        }
        Ok(())
    }

    /// Adds what the executor needs on top of the client selection: arguments
    /// fragments of planned fields, the typename marker on abstract types, and
    /// `__typename` when nothing else is selected.
    fn finish(
        &self,
        parent_type: &Name,
        mut rewritten: Vec<ast::Selection>,
        arguments_fragments: ArgumentsFragments,
    ) -> Result<Vec<ast::Selection>, FetchError> {
        for fragment in arguments_fragments.values() {
            if let Some(origin_type) = self.join.origin_type_name(self.api, fragment.type_condition()) {
                rewritten.push(fragment.inline_fragment(origin_type));
            }
        }
        if matches!(
            self.join.schema().types.get(parent_type),
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
        ) {
            rewritten.push(typename_field(Some(alias(typename_alias(self.api))?)));
        }
        if rewritten.is_empty() {
            rewritten.push(typename_field(None));
        }
        Ok(rewritten)
    }
}

/// Appends `field`, merging its selection set into an earlier field with the
/// same alias, arguments and directives.
fn merge_field(rewritten: &mut Vec<ast::Selection>, field: ast::Field) {
    let existing = rewritten.iter_mut().find_map(|selection| match selection {
        ast::Selection::Field(existing)
            if existing.alias == field.alias
                && existing.name == field.name
                && existing.arguments == field.arguments =>
        {
            Some(existing)
        }
        _ => None,
    });
    let Some(existing) = existing else {
        rewritten.push(ast::Selection::Field(Node::new(field)));
        return;
    };
    let merged = &mut existing.make_mut().selection_set;
    for selection in field.selection_set {
        match selection {
            ast::Selection::Field(field) => merge_field(merged, field.as_ref().clone()),
            other => merged.push(other),
        }
    }
}

fn typename_field(alias: Option<Name>) -> ast::Selection {
    ast::Selection::Field(Node::new(ast::Field {
        alias,
        name: name!("__typename"),
        arguments: Vec::new(),
        directives: Default::default(),
        selection_set: Vec::new(),
    }))
}

fn alias(alias: String) -> Result<Name, FetchError> {
    Name::new(&alias).map_err(|_| FetchError::InvalidArgument {
        name: alias.clone(),
        reason: format!("can not alias a field as '{alias}'"),
    })
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use apollo_compiler::validation::Valid;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::ast::operation_document;
    use crate::schema::RemoteSchema;
    use crate::schema::RemoteSchemas;

    const JOIN_IDL: &str = r#"
        schema { query: Query }
        type Query {
          foo: Px_Foo @resolveWith(query: "foo")
          search: Px_Result @resolveWith(query: "search")
        }
        extend type Px_Foo {
          dependent: String @resolveWith(query: "dependent", extraArgs: { fromFragment: "FooArgs" })
        }
        query foo @send(to: "test") { foo { ...CLIENT_SELECTION } }
        query search @send(to: "test") { search { ...CLIENT_SELECTION } }
        query dependent($id: ID) @send(to: "test") { dependent(id: $id) }
        fragment FooArgs on Px_Foo { id @export(as: "id") }
    "#;

    const ORIGIN: &str = r#"
        type Query { foo: Foo search: Result dependent(id: ID): String }
        type Foo { id: ID name(upper: Boolean, case: Case): String bar: Bar }
        enum Case { UPPER LOWER }
        type Bar { x: Int }
        union Result = Foo | Bar
    "#;

    fn join_schema() -> JoinSchema {
        let remote = RemoteSchema::with_prefix(
            Schema::parse_and_validate(ORIGIN, "origin.graphql").unwrap(),
            "Px_",
        );
        let remotes: RemoteSchemas = [("test".to_string(), remote)].into_iter().collect();
        JoinSchema::parse(JOIN_IDL, &remotes).unwrap()
    }

    fn rewrite(join: &JoinSchema, query: &str, variables: serde_json_bytes::Value) -> String {
        let document: Valid<ExecutableDocument> =
            ExecutableDocument::parse_and_validate(join.schema(), query, "query.graphql").unwrap();
        let operation = document.operations.get(None).unwrap();
        let fields: Vec<_> = operation
            .selection_set
            .selections
            .iter()
            .filter_map(|selection| selection.as_field())
            .collect();
        let variables = variables.as_object().cloned().unwrap_or_default();
        let rewriter = QueryRewriter::new(join, &document, operation, &variables, "test");
        let selection = rewriter.rewrite_field_selection(&fields).unwrap().unwrap();
        operation_document(ast::OperationType::Query, selection).to_string()
    }

    fn expected(query: &str) -> String {
        ast::Document::parse(query, "expected.graphql")
            .unwrap()
            .to_string()
    }

    #[test]
    fn aliases_fields_and_inlines_arguments() {
        let join = join_schema();
        assert_eq!(
            rewrite(
                &join,
                "query($upper: Boolean) { foo { id loud: name(upper: $upper) __typename } }",
                json!({ "upper": true }),
            ),
            expected("{ ___a_id: id ___a_loud: name(upper: true) }")
        );
    }

    #[test]
    fn enum_variables_are_inlined_as_enum_values() {
        let join = join_schema();
        assert_eq!(
            rewrite(
                &join,
                "query($case: Px_Case) { foo { fixed: name(case: LOWER) name(case: $case) } }",
                json!({ "case": "UPPER" }),
            ),
            expected("{ ___a_fixed: name(case: LOWER) ___a_name: name(case: UPPER) }")
        );
    }

    #[test]
    fn merges_repeated_fields() {
        let join = join_schema();
        assert_eq!(
            rewrite(&join, "{ foo { bar { x } } foo { id bar { x } } }", json!({})),
            expected("{ ___a_bar: bar { ___a_x: x } ___a_id: id }")
        );
    }

    #[test]
    fn planned_fields_are_replaced_by_their_arguments_fragment() {
        let join = join_schema();
        assert_eq!(
            rewrite(&join, "{ foo { name dependent } }", json!({})),
            expected("{ ___a_name: name ... on Foo { ___f_FooArgs_id: id } }")
        );
    }

    #[test]
    fn abstract_types_get_a_typename_marker_and_origin_type_conditions() {
        let join = join_schema();
        assert_eq!(
            rewrite(
                &join,
                "{ search { ... on Px_Foo { id } ...BarFields } } fragment BarFields on Px_Bar { x }",
                json!({}),
            ),
            expected(
                "{ ... on Foo { ___a_id: id } ... on Bar { ___a_x: x } ___t_test: __typename }"
            )
        );
    }

    #[test]
    fn skipped_selections_are_not_sent() {
        let join = join_schema();
        assert_eq!(
            rewrite(
                &join,
                "query($skip: Boolean!) { foo { id @skip(if: $skip) name @include(if: $skip) } }",
                json!({ "skip": true }),
            ),
            expected("{ ___a_name: name }")
        );
        assert_eq!(
            rewrite(&join, "{ foo { __typename } }", json!({})),
            expected("{ __typename }")
        );
    }
}
