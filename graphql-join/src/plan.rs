//! Resolution plans compiled from the operations and fragments of a join IDL.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::name;
use indexmap::IndexMap;

use crate::ast::VariableTypes;
use crate::ast::prefix_top_level_fields;
use crate::ast::value::substitute_arguments;
use crate::ast::value::substitute_directives;
use crate::ast::value_to_json;
use crate::ast::visitor::DeepestPath;
use crate::ast::visitor::SelectionVisitor;
use crate::ast::visitor::walk_selection_set;
use crate::directives::EXPORT_DIRECTIVE;
use crate::directives::JoinDirectives;
use crate::error::FetchError;
use crate::error::JoinError;
use crate::graphql;
use crate::json_ext::Object;
use crate::response::ProxyValue;
use crate::response::extract_by_path;
use crate::response::inject_errors;

/// Name of the fragment spread marking where the client selection goes.
pub const CLIENT_SELECTION: &str = "CLIENT_SELECTION";

/// Prefix of the aliases given to client fields sent to an origin API.
pub const ALIAS_PREFIX: &str = "___a_";

/// Prefix of the `__typename` aliases used to resolve abstract types.
pub const TYPENAME_ALIAS_PREFIX: &str = "___t_";

/// Prefix of the aliases given to the fields of an arguments fragment.
pub const FRAGMENT_ALIAS_PREFIX: &str = "___f_";

/// The alias a client field with response key `key` is sent under.
pub fn prefixed_alias(key: &str) -> String {
    format!("{ALIAS_PREFIX}{key}")
}

/// The alias of the injected `__typename` of API `api`.
pub fn typename_alias(api: &str) -> String {
    format!("{TYPENAME_ALIAS_PREFIX}{api}")
}

/// A join IDL operation, ready to be sent with a client selection spliced in.
#[derive(Debug, Clone)]
pub struct ProxyOperation {
    name: Name,
    send_to: String,
    operation_type: ast::OperationType,
    selection_set: Vec<ast::Selection>,
    /// Declared in the type names of the API the operation is sent to.
    variables: Vec<Node<ast::VariableDefinition>>,
    default_arguments: Object,
    result_path: Vec<Name>,
}

impl ProxyOperation {
    /// Compiles a named join IDL operation annotated with `@send`.
    pub fn new(
        directives: &JoinDirectives,
        operation: &ast::OperationDefinition,
    ) -> Result<Self, JoinError> {
        let name = operation.name.clone().ok_or(JoinError::AnonymousOperation)?;
        if operation.operation_type == ast::OperationType::Subscription {
            return Err(JoinError::UnsupportedOperationType {
                operation: name.to_string(),
            });
        }
        let send_to = directives
            .send(&operation.directives)
            .ok_or_else(|| JoinError::MissingSendDirective {
                operation: name.to_string(),
            })?
            .to;

        let mut splice_points = SplicePoints::default();
        walk_selection_set(&operation.selection_set, &mut splice_points);
        if let Some(fragment) = splice_points.unexpected.first() {
            return Err(JoinError::UnexpectedFragmentSpread {
                fragment: fragment.to_string(),
                context: format!("operation '{name}'"),
            });
        }
        if splice_points.count > 1 {
            return Err(JoinError::SplicePointCount {
                operation: name.to_string(),
                count: splice_points.count,
            });
        }

        let mut deepest = DeepestPath::default();
        walk_selection_set(&operation.selection_set, &mut deepest);

        let no_variables = Object::new();
        let default_arguments = operation
            .variables
            .iter()
            .filter_map(|variable| {
                let default = variable.default_value.as_ref()?;
                Some((
                    variable.name.as_str().into(),
                    value_to_json(default, &no_variables)?,
                ))
            })
            .collect();

        Ok(Self {
            name,
            send_to,
            operation_type: operation.operation_type,
            selection_set: operation.selection_set.clone(),
            variables: operation.variables.clone(),
            default_arguments,
            result_path: deepest.0,
        })
    }

    /// Forwards root field `field` unchanged to API `send_to`, every argument
    /// bound to the variable of the same name.
    ///
    /// `field` is the definition of the root field in the schema of `send_to`.
    pub fn pass_through(
        send_to: &str,
        operation_type: ast::OperationType,
        field: &ast::FieldDefinition,
    ) -> Self {
        let arguments = field
            .arguments
            .iter()
            .map(|argument| {
                Node::new(ast::Argument {
                    name: argument.name.clone(),
                    value: Node::new(ast::Value::Variable(argument.name.clone())),
                })
            })
            .collect();
        let variables = field
            .arguments
            .iter()
            .map(|argument| {
                Node::new(ast::VariableDefinition {
                    name: argument.name.clone(),
                    ty: argument.ty.clone(),
                    default_value: None,
                    directives: Default::default(),
                })
            })
            .collect();
        let client_selection = ast::Selection::FragmentSpread(Node::new(ast::FragmentSpread {
            fragment_name: name!("CLIENT_SELECTION"),
            directives: Default::default(),
        }));
        Self {
            name: field.name.clone(),
            send_to: send_to.to_string(),
            operation_type,
            selection_set: vec![ast::Selection::Field(Node::new(ast::Field {
                alias: None,
                name: field.name.clone(),
                arguments,
                directives: Default::default(),
                selection_set: vec![client_selection],
            }))],
            variables,
            default_arguments: Object::new(),
            result_path: vec![field.name.clone()],
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn send_to(&self) -> &str {
        &self.send_to
    }

    pub fn operation_type(&self) -> ast::OperationType {
        self.operation_type
    }

    /// Where the resolved value sits in a response to this operation.
    pub fn result_path(&self) -> &[Name] {
        &self.result_path
    }

    /// The operation's selection set with every variable replaced by the
    /// literal of its argument, or of its default when the argument is
    /// absent, and the `CLIENT_SELECTION` spread replaced by
    /// `client_selection`.
    ///
    /// Arguments bound to a variable with no value are left out. Values of
    /// enum-typed variables, looked up in `origin_schema`, are written as
    /// enum literals.
    pub fn wrap_selection(
        &self,
        arguments: &Object,
        client_selection: Option<&[ast::Selection]>,
        origin_schema: &Schema,
    ) -> Result<Vec<ast::Selection>, FetchError> {
        let mut values = self.default_arguments.clone();
        for (key, value) in arguments {
            values.insert(key.clone(), value.clone());
        }
        let types = VariableTypes::new(&self.variables, origin_schema);
        wrap(&self.selection_set, &values, &types, client_selection)
    }

    /// Merges the errors of `response` into its data and extracts the value at the result path.
    pub fn make_root_value(&self, response: graphql::Response) -> Result<ProxyValue, FetchError> {
        let data = inject_errors(&self.send_to, response)?;
        Ok(extract_by_path(&data, &self.result_path).unwrap_or_default())
    }

    pub fn make_proxy_call(&self, arguments: Object) -> ProxyCall<'_> {
        ProxyCall {
            operation: self,
            arguments,
        }
    }
}

fn wrap(
    selection_set: &[ast::Selection],
    values: &Object,
    types: &VariableTypes<'_>,
    client_selection: Option<&[ast::Selection]>,
) -> Result<Vec<ast::Selection>, FetchError> {
    let mut wrapped = Vec::with_capacity(selection_set.len());
    for selection in selection_set {
        match selection {
            ast::Selection::Field(field) => {
                wrapped.push(ast::Selection::Field(Node::new(ast::Field {
                    alias: field.alias.clone(),
                    name: field.name.clone(),
                    arguments: substitute_arguments(&field.arguments, values, types)?,
                    directives: substitute_directives(&field.directives, values, types)?,
                    selection_set: wrap(&field.selection_set, values, types, client_selection)?,
                })))
            }
            ast::Selection::InlineFragment(fragment) => {
                wrapped.push(ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
                    type_condition: fragment.type_condition.clone(),
                    directives: substitute_directives(&fragment.directives, values, types)?,
                    selection_set: wrap(&fragment.selection_set, values, types, client_selection)?,
                })))
            }
            ast::Selection::FragmentSpread(spread) if spread.fragment_name == CLIENT_SELECTION => {
                wrapped.extend(client_selection.into_iter().flatten().cloned())
            }
            ast::Selection::FragmentSpread(_) => wrapped.push(selection.clone()),
        }
    }
    Ok(wrapped)
}

#[derive(Default)]
struct SplicePoints {
    count: usize,
    unexpected: Vec<Name>,
}

impl SelectionVisitor for SplicePoints {
    fn fragment_spread(&mut self, spread: &ast::FragmentSpread, _path: &[Name]) {
        if spread.fragment_name == CLIENT_SELECTION {
            self.count += 1;
        } else {
            self.unexpected.push(spread.fragment_name.clone());
        }
    }
}

/// A join IDL fragment whose `@export`ed fields supply extra arguments to a
/// dependent call.
#[derive(Debug, Clone)]
pub struct ArgumentsFragment {
    name: Name,
    type_condition: Name,
    /// Fields to request alongside the parent object, `@export` removed and
    /// top-level fields aliased.
    selection_set: Vec<ast::Selection>,
    /// Export name to where its value sits in the parent object.
    export_paths: IndexMap<String, Vec<Name>>,
}

impl ArgumentsFragment {
    pub fn new(
        directives: &JoinDirectives,
        fragment: &ast::FragmentDefinition,
    ) -> Result<Self, JoinError> {
        let mut spreads = SplicePoints::default();
        walk_selection_set(&fragment.selection_set, &mut spreads);
        if spreads.count > 0 || !spreads.unexpected.is_empty() {
            let spread = spreads
                .unexpected
                .first()
                .map_or(CLIENT_SELECTION, |name| name.as_str());
            return Err(JoinError::UnexpectedFragmentSpread {
                fragment: spread.to_string(),
                context: format!("fragment '{}'", fragment.name),
            });
        }

        let alias_prefix = format!("{FRAGMENT_ALIAS_PREFIX}{}_", fragment.name);
        let prefixed = prefix_top_level_fields(&fragment.selection_set, &alias_prefix).map_err(
            |_| JoinError::InvalidName {
                name: alias_prefix.clone(),
            },
        )?;

        let mut exports = Exports {
            directives,
            paths: IndexMap::new(),
        };
        walk_selection_set(&prefixed, &mut exports);

        Ok(Self {
            name: fragment.name.clone(),
            type_condition: fragment.type_condition.clone(),
            selection_set: strip_exports(&prefixed),
            export_paths: exports.paths,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn type_condition(&self) -> &Name {
        &self.type_condition
    }

    pub fn export_paths(&self) -> &IndexMap<String, Vec<Name>> {
        &self.export_paths
    }

    /// Reads the exported values out of an already fetched parent object.
    ///
    /// Missing values are left out. A value that is itself an error fails the
    /// extraction with that error.
    pub fn extract_args(&self, parent: &ProxyValue) -> Result<Object, graphql::Error> {
        let mut arguments = Object::new();
        for (name, path) in &self.export_paths {
            match extract_by_path(parent, path) {
                None => {}
                Some(ProxyValue::Error(error)) => return Err(*error),
                Some(value) => {
                    arguments.insert(name.as_str(), value.to_json()?);
                }
            }
        }
        Ok(arguments)
    }

    /// The fragment's fields as an inline fragment on `type_condition`, the
    /// name of the fragment's type in the API the parent is fetched from.
    pub fn inline_fragment(&self, type_condition: Name) -> ast::Selection {
        ast::Selection::InlineFragment(Node::new(ast::InlineFragment {
            type_condition: Some(type_condition),
            directives: Default::default(),
            selection_set: self.selection_set.clone(),
        }))
    }
}

struct Exports<'a> {
    directives: &'a JoinDirectives,
    paths: IndexMap<String, Vec<Name>>,
}

impl SelectionVisitor for Exports<'_> {
    fn enter_field(&mut self, field: &ast::Field, path: &[Name]) {
        if let Some(export) = self.directives.export(&field.directives) {
            self.paths.insert(export.name, path.to_vec());
        }
    }
}

fn strip_exports(selection_set: &[ast::Selection]) -> Vec<ast::Selection> {
    selection_set
        .iter()
        .map(|selection| match selection {
            ast::Selection::Field(field) => {
                let mut field = field.clone();
                let field_mut = field.make_mut();
                field_mut
                    .directives
                    .0
                    .retain(|directive| directive.name != EXPORT_DIRECTIVE);
                field_mut.selection_set = strip_exports(&field_mut.selection_set);
                ast::Selection::Field(field)
            }
            ast::Selection::InlineFragment(fragment) => {
                let mut fragment = fragment.clone();
                let fragment_mut = fragment.make_mut();
                fragment_mut.selection_set = strip_exports(&fragment_mut.selection_set);
                ast::Selection::InlineFragment(fragment)
            }
            ast::Selection::FragmentSpread(_) => selection.clone(),
        })
        .collect()
}

/// The resolve plan of one join field.
#[derive(Debug, Clone)]
pub struct ResolveWithArgs {
    pub query: Arc<ProxyOperation>,
    pub arguments_fragment: Option<Arc<ArgumentsFragment>>,
}

/// One call to an origin API, bound to its arguments.
#[derive(Debug)]
pub struct ProxyCall<'a> {
    operation: &'a ProxyOperation,
    arguments: Object,
}

impl ProxyCall<'_> {
    pub fn send_to(&self) -> &str {
        self.operation.send_to()
    }

    pub fn operation_type(&self) -> ast::OperationType {
        self.operation.operation_type()
    }

    pub fn result_path(&self) -> &[Name] {
        self.operation.result_path()
    }

    pub fn arguments(&self) -> &Object {
        &self.arguments
    }

    /// The selection set to send, with `client_selection` spliced in.
    pub fn make_selection_set(
        &self,
        client_selection: Option<&[ast::Selection]>,
        origin_schema: &Schema,
    ) -> Result<Vec<ast::Selection>, FetchError> {
        self.operation
            .wrap_selection(&self.arguments, client_selection, origin_schema)
    }

    pub fn make_root_value(&self, response: graphql::Response) -> Result<ProxyValue, FetchError> {
        self.operation.make_root_value(response)
    }
}
