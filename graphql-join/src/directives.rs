//! The directives a join IDL is annotated with.
//!
//! ```graphql
//! directive @export(as: String!) on FIELD
//! directive @send(to: String!) on QUERY | MUTATION
//! directive @resolveWith(query: String!, extraArgs: ExtraArgs, transformArgs: String) on FIELD_DEFINITION
//! input ExtraArgs { fromFragment: String }
//! ```

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::ast::DirectiveLocation;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexSet;

use crate::ast::response_key;
use crate::error::DirectiveDiagnostic;
use crate::error::DirectiveDiagnostics;

pub const EXPORT_DIRECTIVE: &str = "export";
pub const SEND_DIRECTIVE: &str = "send";
pub const RESOLVE_WITH_DIRECTIVE: &str = "resolveWith";

const JOIN_DIRECTIVES_SDL: &str = r#"
directive @export(as: String!) on FIELD
directive @send(to: String!) on QUERY | MUTATION
directive @resolveWith(query: String!, extraArgs: ExtraArgs, transformArgs: String) on FIELD_DEFINITION
input ExtraArgs { fromFragment: String }
"#;

/// Arguments of `@export`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArgs {
    /// The argument name the exported value is bound to.
    pub name: String,
}

/// Arguments of `@send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendArgs {
    /// The API the operation is sent to.
    pub to: String,
}

/// Arguments of `@resolveWith`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveWithDirectiveArgs {
    pub query: String,
    pub from_fragment: Option<String>,
    pub transform_args: Option<String>,
}

/// Definitions of the join directives, next to the built-in ones.
///
/// Built once and passed by reference to whatever reads or validates join IDL directives.
#[derive(Debug, Clone)]
pub struct JoinDirectives {
    schema: Schema,
}

impl Default for JoinDirectives {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinDirectives {
    pub fn new() -> Self {
        let schema = Schema::parse(JOIN_DIRECTIVES_SDL, "join_directives.graphql")
            .expect("join directive definitions are valid SDL");
        Self { schema }
    }

    /// The arguments of `@export` in `directives`, if present.
    pub fn export(&self, directives: &ast::DirectiveList) -> Option<ExportArgs> {
        Some(ExportArgs {
            name: self.string_argument(directives, EXPORT_DIRECTIVE, "as")?,
        })
    }

    /// The arguments of `@send` in `directives`, if present.
    pub fn send(&self, directives: &ast::DirectiveList) -> Option<SendArgs> {
        Some(SendArgs {
            to: self.string_argument(directives, SEND_DIRECTIVE, "to")?,
        })
    }

    /// The arguments of `@resolveWith` in `directives`, if present.
    pub fn resolve_with(&self, directives: &ast::DirectiveList) -> Option<ResolveWithDirectiveArgs> {
        let query = self.string_argument(directives, RESOLVE_WITH_DIRECTIVE, "query")?;
        let from_fragment = self
            .argument(directives, RESOLVE_WITH_DIRECTIVE, "extraArgs")
            .and_then(|extra_args| match &**extra_args {
                ast::Value::Object(fields) => fields
                    .iter()
                    .find(|(name, _)| name == "fromFragment")
                    .and_then(|(_, value)| value.as_str())
                    .map(str::to_string),
                _ => None,
            });
        Some(ResolveWithDirectiveArgs {
            query,
            from_fragment,
            transform_args: self.string_argument(directives, RESOLVE_WITH_DIRECTIVE, "transformArgs"),
        })
    }

    /// Whether `name` is one of the join directives.
    pub fn is_join_directive(name: &str) -> bool {
        [EXPORT_DIRECTIVE, SEND_DIRECTIVE, RESOLVE_WITH_DIRECTIVE].contains(&name)
    }

    fn argument<'a>(
        &'a self,
        directives: &'a ast::DirectiveList,
        directive_name: &str,
        argument_name: &str,
    ) -> Option<&'a Node<ast::Value>> {
        let directive = directives.get(directive_name)?;
        directive
            .specified_argument_by_name(argument_name)
            .or_else(|| {
                self.schema
                    .directive_definitions
                    .get(directive_name)?
                    .arguments
                    .iter()
                    .find(|argument| argument.name == argument_name)?
                    .default_value
                    .as_ref()
            })
            .filter(|value| !value.is_null())
    }

    fn string_argument(
        &self,
        directives: &ast::DirectiveList,
        directive_name: &str,
        argument_name: &str,
    ) -> Option<String> {
        self.argument(directives, directive_name, argument_name)?
            .as_str()
            .map(str::to_string)
    }

    /// Checks every directive usage in `document`: unknown directives, wrong
    /// locations, duplicates, unknown or duplicate arguments, missing required
    /// arguments and argument values of the wrong shape.
    pub fn validate(&self, document: &ast::Document) -> DirectiveDiagnostics {
        let mut validator = Validator {
            schema: &self.schema,
            diagnostics: Vec::new(),
        };
        for definition in &document.definitions {
            validator.definition(definition);
        }
        DirectiveDiagnostics(validator.diagnostics)
    }
}

struct Validator<'a> {
    schema: &'a Schema,
    diagnostics: Vec<DirectiveDiagnostic>,
}

impl Validator<'_> {
    fn report(&mut self, coordinate: &str, message: String) {
        self.diagnostics.push(DirectiveDiagnostic {
            coordinate: coordinate.to_string(),
            message,
        });
    }

    fn definition(&mut self, definition: &ast::Definition) {
        match definition {
            ast::Definition::OperationDefinition(operation) => {
                let (kind, location) = match operation.operation_type {
                    ast::OperationType::Query => ("query", DirectiveLocation::Query),
                    ast::OperationType::Mutation => ("mutation", DirectiveLocation::Mutation),
                    ast::OperationType::Subscription => {
                        ("subscription", DirectiveLocation::Subscription)
                    }
                };
                let coordinate = match &operation.name {
                    Some(name) => format!("{kind} {name}"),
                    None => kind.to_string(),
                };
                self.directives(&operation.directives, location, &coordinate);
                for variable in &operation.variables {
                    self.directives(
                        &variable.directives,
                        DirectiveLocation::VariableDefinition,
                        &format!("{coordinate}(${})", variable.name),
                    );
                }
                self.selection_set(&operation.selection_set, &coordinate, &[]);
            }
            ast::Definition::FragmentDefinition(fragment) => {
                let coordinate = format!("fragment {}", fragment.name);
                self.directives(
                    &fragment.directives,
                    DirectiveLocation::FragmentDefinition,
                    &coordinate,
                );
                self.selection_set(&fragment.selection_set, &coordinate, &[]);
            }
            ast::Definition::DirectiveDefinition(directive) => {
                self.input_values(&directive.arguments, &format!("@{}", directive.name), true);
            }
            ast::Definition::SchemaDefinition(schema) => {
                self.directives(&schema.directives, DirectiveLocation::Schema, "schema")
            }
            ast::Definition::SchemaExtension(schema) => {
                self.directives(&schema.directives, DirectiveLocation::Schema, "schema")
            }
            ast::Definition::ScalarTypeDefinition(def) => {
                self.directives(&def.directives, DirectiveLocation::Scalar, def.name.as_str())
            }
            ast::Definition::ScalarTypeExtension(def) => {
                self.directives(&def.directives, DirectiveLocation::Scalar, def.name.as_str())
            }
            ast::Definition::ObjectTypeDefinition(def) => {
                self.directives(&def.directives, DirectiveLocation::Object, def.name.as_str());
                self.fields(&def.fields, &def.name);
            }
            ast::Definition::ObjectTypeExtension(def) => {
                self.directives(&def.directives, DirectiveLocation::Object, def.name.as_str());
                self.fields(&def.fields, &def.name);
            }
            ast::Definition::InterfaceTypeDefinition(def) => {
                self.directives(&def.directives, DirectiveLocation::Interface, def.name.as_str());
                self.fields(&def.fields, &def.name);
            }
            ast::Definition::InterfaceTypeExtension(def) => {
                self.directives(&def.directives, DirectiveLocation::Interface, def.name.as_str());
                self.fields(&def.fields, &def.name);
            }
            ast::Definition::UnionTypeDefinition(def) => {
                self.directives(&def.directives, DirectiveLocation::Union, def.name.as_str())
            }
            ast::Definition::UnionTypeExtension(def) => {
                self.directives(&def.directives, DirectiveLocation::Union, def.name.as_str())
            }
            ast::Definition::EnumTypeDefinition(def) => {
                self.directives(&def.directives, DirectiveLocation::Enum, def.name.as_str());
                self.enum_values(&def.values, &def.name);
            }
            ast::Definition::EnumTypeExtension(def) => {
                self.directives(&def.directives, DirectiveLocation::Enum, def.name.as_str());
                self.enum_values(&def.values, &def.name);
            }
            ast::Definition::InputObjectTypeDefinition(def) => {
                self.directives(&def.directives, DirectiveLocation::InputObject, def.name.as_str());
                self.input_values(&def.fields, &def.name, false);
            }
            ast::Definition::InputObjectTypeExtension(def) => {
                self.directives(&def.directives, DirectiveLocation::InputObject, def.name.as_str());
                self.input_values(&def.fields, &def.name, false);
            }
        }
    }

    fn fields(&mut self, fields: &[Node<ast::FieldDefinition>], type_name: &Name) {
        for field in fields {
            let coordinate = format!("{type_name}.{}", field.name);
            self.directives(
                &field.directives,
                DirectiveLocation::FieldDefinition,
                &coordinate,
            );
            self.input_values(&field.arguments, &coordinate, true);
        }
    }

    fn input_values(
        &mut self,
        values: &[Node<ast::InputValueDefinition>],
        parent: &str,
        arguments: bool,
    ) {
        for value in values {
            let (location, coordinate) = if arguments {
                (
                    DirectiveLocation::ArgumentDefinition,
                    format!("{parent}({}:)", value.name),
                )
            } else {
                (
                    DirectiveLocation::InputFieldDefinition,
                    format!("{parent}.{}", value.name),
                )
            };
            self.directives(&value.directives, location, &coordinate);
        }
    }

    fn enum_values(&mut self, values: &[Node<ast::EnumValueDefinition>], type_name: &Name) {
        for value in values {
            self.directives(
                &value.directives,
                DirectiveLocation::EnumValue,
                &format!("{type_name}.{}", value.value),
            );
        }
    }

    fn selection_set(&mut self, selections: &[ast::Selection], parent: &str, path: &[&Name]) {
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    let mut path = path.to_vec();
                    path.push(response_key(field));
                    let coordinate = format!(
                        "{parent}: {}",
                        path.iter().map(|name| name.as_str()).collect::<Vec<_>>().join(".")
                    );
                    self.directives(&field.directives, DirectiveLocation::Field, &coordinate);
                    self.selection_set(&field.selection_set, parent, &path);
                }
                ast::Selection::InlineFragment(fragment) => {
                    self.directives(
                        &fragment.directives,
                        DirectiveLocation::InlineFragment,
                        parent,
                    );
                    self.selection_set(&fragment.selection_set, parent, path);
                }
                ast::Selection::FragmentSpread(spread) => self.directives(
                    &spread.directives,
                    DirectiveLocation::FragmentSpread,
                    &format!("{parent}: ...{}", spread.fragment_name),
                ),
            }
        }
    }

    fn directives(
        &mut self,
        directives: &ast::DirectiveList,
        location: DirectiveLocation,
        coordinate: &str,
    ) {
        let mut seen = IndexSet::new();
        for directive in directives.iter() {
            let Some(definition) = self.schema.directive_definitions.get(&directive.name) else {
                self.report(
                    coordinate,
                    format!("Unknown directive \"@{}\".", directive.name),
                );
                continue;
            };
            if !definition.locations.contains(&location) {
                self.report(
                    coordinate,
                    format!(
                        "Directive \"@{}\" may not be used on {}.",
                        directive.name,
                        location_name(location)
                    ),
                );
            }
            if !definition.repeatable && !seen.insert(directive.name.clone()) {
                self.report(
                    coordinate,
                    format!(
                        "The directive \"@{}\" can only be used once at this location.",
                        directive.name
                    ),
                );
            }

            let mut seen_arguments = IndexSet::new();
            for argument in &directive.arguments {
                if !seen_arguments.insert(argument.name.clone()) {
                    self.report(
                        coordinate,
                        format!(
                            "There can be only one argument named \"{}\".",
                            argument.name
                        ),
                    );
                    continue;
                }
                match definition
                    .arguments
                    .iter()
                    .find(|defined| defined.name == argument.name)
                {
                    None => self.report(
                        coordinate,
                        format!(
                            "Unknown argument \"{}\" on directive \"@{}\".",
                            argument.name, directive.name
                        ),
                    ),
                    Some(defined) => {
                        if let Err(message) = self.value(&argument.value, &defined.ty) {
                            self.report(coordinate, message);
                        }
                    }
                }
            }
            for defined in &definition.arguments {
                if defined.ty.is_non_null()
                    && defined.default_value.is_none()
                    && !seen_arguments.contains(&defined.name)
                {
                    self.report(
                        coordinate,
                        format!(
                            "Directive \"@{}\" argument \"{}\" of type \"{}\" is required, but it was not provided.",
                            directive.name, defined.name, defined.ty
                        ),
                    );
                }
            }
        }
    }

    /// Checks that a literal can be coerced to `ty`.
    fn value(&self, value: &ast::Value, ty: &ast::Type) -> Result<(), String> {
        let mismatch = || format!("Expected value of type \"{ty}\", found {value}.");
        match (value, ty) {
            (ast::Value::Variable(_), _) => Ok(()),
            (ast::Value::Null, _) if ty.is_non_null() => Err(mismatch()),
            (ast::Value::Null, _) => Ok(()),
            (ast::Value::List(items), ast::Type::List(item_ty) | ast::Type::NonNullList(item_ty)) => {
                items.iter().try_for_each(|item| self.value(item, item_ty))
            }
            (_, ast::Type::List(item_ty) | ast::Type::NonNullList(item_ty)) => {
                self.value(value, item_ty)
            }
            (_, ast::Type::Named(name) | ast::Type::NonNullNamed(name)) => {
                match self.schema.types.get(name) {
                    Some(ExtendedType::Scalar(_)) => {
                        let accepted = match name.as_str() {
                            "String" => matches!(value, ast::Value::String(_)),
                            "ID" => matches!(value, ast::Value::String(_) | ast::Value::Int(_)),
                            "Int" => matches!(value, ast::Value::Int(_)),
                            "Float" => matches!(value, ast::Value::Int(_) | ast::Value::Float(_)),
                            "Boolean" => matches!(value, ast::Value::Boolean(_)),
                            _ => true,
                        };
                        if accepted { Ok(()) } else { Err(mismatch()) }
                    }
                    Some(ExtendedType::Enum(enum_type)) => match value {
                        ast::Value::Enum(value) if enum_type.values.contains_key(value) => Ok(()),
                        _ => Err(mismatch()),
                    },
                    Some(ExtendedType::InputObject(input_type)) => {
                        let ast::Value::Object(fields) = value else {
                            return Err(mismatch());
                        };
                        let mut seen = IndexSet::new();
                        for (field_name, field_value) in fields {
                            if !seen.insert(field_name.clone()) {
                                return Err(format!(
                                    "There can be only one input field named \"{field_name}\"."
                                ));
                            }
                            let Some(field) = input_type.fields.get(field_name) else {
                                return Err(format!(
                                    "Field \"{field_name}\" is not defined by type \"{name}\"."
                                ));
                            };
                            self.value(field_value, &field.ty)?;
                        }
                        for (field_name, field) in &input_type.fields {
                            if field.ty.is_non_null()
                                && field.default_value.is_none()
                                && !seen.contains(field_name)
                            {
                                return Err(format!(
                                    "Field \"{name}.{field_name}\" of required type \"{}\" was not provided.",
                                    field.ty
                                ));
                            }
                        }
                        Ok(())
                    }
                    _ => Err(mismatch()),
                }
            }
        }
    }
}

fn location_name(location: DirectiveLocation) -> &'static str {
    match location {
        DirectiveLocation::Query => "QUERY",
        DirectiveLocation::Mutation => "MUTATION",
        DirectiveLocation::Subscription => "SUBSCRIPTION",
        DirectiveLocation::Field => "FIELD",
        DirectiveLocation::FragmentDefinition => "FRAGMENT_DEFINITION",
        DirectiveLocation::FragmentSpread => "FRAGMENT_SPREAD",
        DirectiveLocation::InlineFragment => "INLINE_FRAGMENT",
        DirectiveLocation::VariableDefinition => "VARIABLE_DEFINITION",
        DirectiveLocation::Schema => "SCHEMA",
        DirectiveLocation::Scalar => "SCALAR",
        DirectiveLocation::Object => "OBJECT",
        DirectiveLocation::FieldDefinition => "FIELD_DEFINITION",
        DirectiveLocation::ArgumentDefinition => "ARGUMENT_DEFINITION",
        DirectiveLocation::Interface => "INTERFACE",
        DirectiveLocation::Union => "UNION",
        DirectiveLocation::Enum => "ENUM",
        DirectiveLocation::EnumValue => "ENUM_VALUE",
        DirectiveLocation::InputObject => "INPUT_OBJECT",
        DirectiveLocation::InputFieldDefinition => "INPUT_FIELD_DEFINITION",
    }
}
