//! Conversions between GraphQL literals and JSON values.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use serde_json_bytes::ByteString;

use crate::error::FetchError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// Converts a literal to JSON, reading variables from `variables`.
///
/// Returns `None` when the literal is a reference to an absent variable.
/// Absent variables inside an input object drop that object field, inside a
/// list they become `null`. Scalars are mapped as-is, without coercion.
pub fn value_to_json(value: &ast::Value, variables: &Object) -> Option<Value> {
    Some(match value {
        ast::Value::Null => Value::Null,
        ast::Value::Boolean(boolean) => Value::Bool(*boolean),
        ast::Value::String(string) => Value::String(string.as_str().into()),
        ast::Value::Enum(name) => Value::String(name.as_str().into()),
        ast::Value::Int(int) => number(int.as_str()),
        ast::Value::Float(float) => number(float.as_str()),
        ast::Value::Variable(name) => return variables.get(name.as_str()).cloned(),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| value_to_json(item, variables).unwrap_or(Value::Null))
                .collect(),
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter_map(|(name, value)| {
                    value_to_json(value, variables)
                        .map(|value| (ByteString::from(name.as_str()), value))
                })
                .collect(),
        ),
    })
}

/// Integers in the `i64` or `u64` range are kept exact.
fn number(text: &str) -> Value {
    text.parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// The declared types of the variables of one operation, resolved in the
/// schema the operation is written against.
///
/// JSON has no enum values: a string bound to an enum-typed position must be
/// written back as an enum literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableTypes<'a> {
    definitions: &'a [Node<ast::VariableDefinition>],
    schema: Option<&'a Schema>,
}

impl<'a> VariableTypes<'a> {
    pub fn new(definitions: &'a [Node<ast::VariableDefinition>], schema: &'a Schema) -> Self {
        Self {
            definitions,
            schema: Some(schema),
        }
    }

    fn get(&self, name: &str) -> Option<InputType<'a>> {
        let schema = self.schema?;
        let definition = self
            .definitions
            .iter()
            .find(|definition| definition.name.as_str() == name)?;
        Some(InputType {
            ty: &definition.ty,
            schema,
        })
    }
}

#[derive(Clone, Copy)]
struct InputType<'a> {
    ty: &'a ast::Type,
    schema: &'a Schema,
}

impl<'a> InputType<'a> {
    fn item(self) -> Self {
        if !self.ty.is_list() {
            return self;
        }
        Self {
            ty: self.ty.item_type(),
            ..self
        }
    }

    fn field(self, name: &str) -> Option<Self> {
        match self.schema.types.get(self.ty.inner_named_type())? {
            ExtendedType::InputObject(input) => input.fields.get(name).map(|field| Self {
                ty: &field.ty,
                schema: self.schema,
            }),
            _ => None,
        }
    }

    fn is_enum(self) -> bool {
        matches!(
            self.schema.types.get(self.ty.inner_named_type()),
            Some(ExtendedType::Enum(_))
        )
    }
}

/// Converts a JSON value to the literal that denotes it.
///
/// Object keys must be valid GraphQL names.
pub fn json_to_value(value: &Value) -> Result<ast::Value, FetchError> {
    json_to_literal(value, None)
}

fn json_to_literal(value: &Value, ty: Option<InputType<'_>>) -> Result<ast::Value, FetchError> {
    Ok(match value {
        Value::Null => ast::Value::Null,
        Value::Bool(boolean) => ast::Value::Boolean(*boolean),
        Value::String(string) => match ty
            .filter(|ty| ty.is_enum())
            .and_then(|_| Name::new(string.as_str()).ok())
        {
            Some(value) => ast::Value::Enum(value),
            None => ast::Value::String(string.as_str().to_string()),
        },
        Value::Number(number) => {
            if number.is_f64() {
                ast::Value::Float(ast::FloatValue::from(number.as_f64().unwrap_or_default()))
            } else {
                ast::Value::Int(ast::IntValue::new_parsed(&number.to_string()))
            }
        }
        Value::Array(items) => ast::Value::List(
            items
                .iter()
                .map(|item| json_to_literal(item, ty.map(InputType::item)).map(Node::new))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(fields) => ast::Value::Object(
            fields
                .iter()
                .map(|(key, value)| {
                    let name = Name::new(key.as_str()).map_err(|_| FetchError::InvalidArgument {
                        name: key.as_str().to_string(),
                        reason: "object keys must be valid GraphQL names".to_string(),
                    })?;
                    let field_type = ty.and_then(|ty| ty.field(key.as_str()));
                    Ok((name, Node::new(json_to_literal(value, field_type)?)))
                })
                .collect::<Result<_, FetchError>>()?,
        ),
    })
}

/// Replaces every variable reference inside `value` with the literal form of
/// its value in `arguments`.
///
/// Returns `None` when `value` itself is an absent variable, so the caller
/// can drop the argument. Absent variables nested in input objects drop the
/// object field, nested in lists they become `null`. Variable values are
/// written as literals of their declared type in `types`.
pub fn substitute_variables(
    value: &ast::Value,
    arguments: &Object,
    types: &VariableTypes<'_>,
) -> Result<Option<ast::Value>, FetchError> {
    Ok(Some(match value {
        ast::Value::Variable(name) => match arguments.get(name.as_str()) {
            Some(value) => json_to_literal(value, types.get(name))?,
            None => return Ok(None),
        },
        ast::Value::List(items) => ast::Value::List(
            items
                .iter()
                .map(|item| {
                    Ok(Node::new(
                        substitute_variables(item, arguments, types)?.unwrap_or(ast::Value::Null),
                    ))
                })
                .collect::<Result<_, FetchError>>()?,
        ),
        ast::Value::Object(fields) => {
            let mut substituted = Vec::with_capacity(fields.len());
            for (name, value) in fields {
                if let Some(value) = substitute_variables(value, arguments, types)? {
                    substituted.push((name.clone(), Node::new(value)));
                }
            }
            ast::Value::Object(substituted)
        }
        other => other.clone(),
    }))
}

/// Substitutes variables in every argument, dropping arguments bound to an
/// absent variable.
pub(crate) fn substitute_arguments(
    arguments: &[Node<ast::Argument>],
    values: &Object,
    types: &VariableTypes<'_>,
) -> Result<Vec<Node<ast::Argument>>, FetchError> {
    let mut substituted = Vec::with_capacity(arguments.len());
    for argument in arguments {
        if let Some(value) = substitute_variables(&argument.value, values, types)? {
            substituted.push(Node::new(ast::Argument {
                name: argument.name.clone(),
                value: Node::new(value),
            }));
        }
    }
    Ok(substituted)
}

/// Substitutes variables in the arguments of every directive.
pub(crate) fn substitute_directives(
    directives: &ast::DirectiveList,
    values: &Object,
    types: &VariableTypes<'_>,
) -> Result<ast::DirectiveList, FetchError> {
    let mut substituted = ast::DirectiveList::default();
    for directive in directives.iter() {
        substituted.0.push(Node::new(ast::Directive {
            name: directive.name.clone(),
            arguments: substitute_arguments(&directive.arguments, values, types)?,
        }));
    }
    Ok(substituted)
}

/// Evaluates `@skip(if:)` and `@include(if:)` in `directives` against `variables`.
pub(crate) fn is_included(directives: &ast::DirectiveList, variables: &Object) -> bool {
    let condition = |name: &str| {
        let value = directives.get(name)?.specified_argument_by_name("if")?;
        match value_to_json(value, variables)? {
            Value::Bool(condition) => Some(condition),
            _ => None,
        }
    };
    !condition("skip").unwrap_or(false) && condition("include").unwrap_or(true)
}
