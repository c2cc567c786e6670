//! Walkers over selection sets and type definitions.
//!
//! [`SelectionVisitor`] gets one enter/leave pair per selection kind and is
//! told the response path at every step, so callers can record where in a
//! response a field's value will show up.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use indexmap::IndexSet;

use super::response_key;

/// Callbacks for [`walk_selection_set`]. Every method defaults to doing nothing.
///
/// `path` is the chain of response keys leading to the node, including the
/// node itself for fields.
pub trait SelectionVisitor {
    fn enter_field(&mut self, _field: &ast::Field, _path: &[Name]) {}

    fn leave_field(&mut self, _field: &ast::Field, _path: &[Name]) {}

    fn enter_inline_fragment(&mut self, _fragment: &ast::InlineFragment, _path: &[Name]) {}

    fn leave_inline_fragment(&mut self, _fragment: &ast::InlineFragment, _path: &[Name]) {}

    fn fragment_spread(&mut self, _spread: &ast::FragmentSpread, _path: &[Name]) {}
}

/// Walks `selection_set` depth-first in document order.
pub fn walk_selection_set(selection_set: &[ast::Selection], visitor: &mut impl SelectionVisitor) {
    let mut path = Vec::new();
    walk_selections(selection_set, visitor, &mut path);
}

fn walk_selections(
    selection_set: &[ast::Selection],
    visitor: &mut impl SelectionVisitor,
    path: &mut Vec<Name>,
) {
    for selection in selection_set {
        match selection {
            ast::Selection::Field(field) => {
                path.push(response_key(field).clone());
                visitor.enter_field(field, path);
                walk_selections(&field.selection_set, visitor, path);
                visitor.leave_field(field, path);
                path.pop();
            }
            ast::Selection::InlineFragment(fragment) => {
                visitor.enter_inline_fragment(fragment, path);
                walk_selections(&fragment.selection_set, visitor, path);
                visitor.leave_inline_fragment(fragment, path);
            }
            ast::Selection::FragmentSpread(spread) => visitor.fragment_spread(spread, path),
        }
    }
}

/// Records the deepest response path reached by any field; the first one wins on ties.
#[derive(Default)]
pub(crate) struct DeepestPath(pub(crate) Vec<Name>);

impl SelectionVisitor for DeepestPath {
    fn enter_field(&mut self, _field: &ast::Field, path: &[Name]) {
        if path.len() > self.0.len() {
            self.0 = path.to_vec();
        }
    }
}

/// Every named type referenced inside `definition`, excluding its own name.
pub fn type_references(definition: &ast::Definition) -> IndexSet<Name> {
    let mut references = IndexSet::new();
    match definition {
        ast::Definition::ObjectTypeDefinition(def) => {
            references.extend(def.implements_interfaces.iter().cloned());
            field_references(&def.fields, &mut references);
        }
        ast::Definition::ObjectTypeExtension(def) => {
            references.extend(def.implements_interfaces.iter().cloned());
            field_references(&def.fields, &mut references);
        }
        ast::Definition::InterfaceTypeDefinition(def) => {
            references.extend(def.implements_interfaces.iter().cloned());
            field_references(&def.fields, &mut references);
        }
        ast::Definition::InterfaceTypeExtension(def) => {
            references.extend(def.implements_interfaces.iter().cloned());
            field_references(&def.fields, &mut references);
        }
        ast::Definition::InputObjectTypeDefinition(def) => {
            input_references(&def.fields, &mut references)
        }
        ast::Definition::InputObjectTypeExtension(def) => {
            input_references(&def.fields, &mut references)
        }
        ast::Definition::UnionTypeDefinition(def) => references.extend(def.members.iter().cloned()),
        ast::Definition::UnionTypeExtension(def) => references.extend(def.members.iter().cloned()),
        ast::Definition::SchemaDefinition(def) => {
            references.extend(def.root_operations.iter().map(|root| root.1.clone()))
        }
        ast::Definition::SchemaExtension(def) => {
            references.extend(def.root_operations.iter().map(|root| root.1.clone()))
        }
        _ => {}
    }
    references
}

fn field_references(fields: &[Node<ast::FieldDefinition>], references: &mut IndexSet<Name>) {
    for field in fields {
        references.insert(field.ty.inner_named_type().clone());
        input_references(&field.arguments, references);
    }
}

fn input_references(inputs: &[Node<ast::InputValueDefinition>], references: &mut IndexSet<Name>) {
    for input in inputs {
        references.insert(input.ty.inner_named_type().clone());
    }
}

/// Replaces the name of `definition` and every named type it references with
/// the result of `rename`; `None` keeps the name unchanged.
pub fn rename_type_references(
    definition: &mut ast::Definition,
    rename: &mut impl FnMut(&Name) -> Option<Name>,
) {
    let mut rename_name = |name: &mut Name| {
        if let Some(renamed) = rename(name) {
            *name = renamed;
        }
    };
    match definition {
        ast::Definition::ObjectTypeDefinition(def) => {
            let def = def.make_mut();
            rename_name(&mut def.name);
            def.implements_interfaces.iter_mut().for_each(&mut rename_name);
            rename_fields(&mut def.fields, &mut rename_name);
        }
        ast::Definition::InterfaceTypeDefinition(def) => {
            let def = def.make_mut();
            rename_name(&mut def.name);
            def.implements_interfaces.iter_mut().for_each(&mut rename_name);
            rename_fields(&mut def.fields, &mut rename_name);
        }
        ast::Definition::UnionTypeDefinition(def) => {
            let def = def.make_mut();
            rename_name(&mut def.name);
            def.members.iter_mut().for_each(&mut rename_name);
        }
        ast::Definition::InputObjectTypeDefinition(def) => {
            let def = def.make_mut();
            rename_name(&mut def.name);
            rename_inputs(&mut def.fields, &mut rename_name);
        }
        ast::Definition::EnumTypeDefinition(def) => rename_name(&mut def.make_mut().name),
        ast::Definition::ScalarTypeDefinition(def) => rename_name(&mut def.make_mut().name),
        _ => {}
    }
}

fn rename_fields(fields: &mut [Node<ast::FieldDefinition>], rename: &mut impl FnMut(&mut Name)) {
    for field in fields {
        let field = field.make_mut();
        rename_type(&mut field.ty, rename);
        rename_inputs(&mut field.arguments, rename);
    }
}

fn rename_inputs(inputs: &mut [Node<ast::InputValueDefinition>], rename: &mut impl FnMut(&mut Name)) {
    for input in inputs {
        rename_type(input.make_mut().ty.make_mut(), rename);
    }
}

fn rename_type(ty: &mut ast::Type, rename: &mut impl FnMut(&mut Name)) {
    match ty {
        ast::Type::Named(name) | ast::Type::NonNullNamed(name) => rename(name),
        ast::Type::List(inner) | ast::Type::NonNullList(inner) => rename_type(inner, rename),
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::name;
    use itertools::Itertools;

    use super::*;

    fn selection_set(query: &str) -> Vec<ast::Selection> {
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        match &document.definitions[0] {
            ast::Definition::OperationDefinition(operation) => operation.selection_set.clone(),
            _ => panic!("expected an operation"),
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl SelectionVisitor for Recorder {
        fn enter_field(&mut self, field: &ast::Field, path: &[Name]) {
            self.0.push(format!("enter {} at {}", field.name, path.iter().join(".")));
        }

        fn leave_field(&mut self, field: &ast::Field, _path: &[Name]) {
            self.0.push(format!("leave {}", field.name));
        }

        fn fragment_spread(&mut self, spread: &ast::FragmentSpread, path: &[Name]) {
            self.0
                .push(format!("spread {} at {}", spread.fragment_name, path.iter().join(".")));
        }
    }

    #[test]
    fn visits_fields_with_response_paths() {
        let mut recorder = Recorder::default();
        walk_selection_set(
            &selection_set("{ a: foo { ... on Foo { bar { ...Frag } } } }"),
            &mut recorder,
        );
        assert_eq!(
            recorder.0,
            vec![
                "enter foo at a",
                "enter bar at a.bar",
                "spread Frag at a.bar",
                "leave bar",
                "leave foo",
            ]
        );
    }

    #[test]
    fn deepest_path_prefers_first_on_ties() {
        let mut deepest = DeepestPath::default();
        walk_selection_set(
            &selection_set("{ foo { x: bar { baz } other { deep } } }"),
            &mut deepest,
        );
        assert_eq!(deepest.0, vec![name!("foo"), name!("x"), name!("baz")]);
    }
}
