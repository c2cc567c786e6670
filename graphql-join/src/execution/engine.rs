//! Field collection, resolution and value completion.

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::schema::ExtendedType;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use indexmap::IndexMap;
use indexmap::IndexSet;
use parking_lot::Mutex;

use super::ProxyContext;
use crate::ast::value::is_included;
use crate::ast::value_to_json;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::plan::ResolveWithArgs;
use crate::plan::TYPENAME_ALIAS_PREFIX;
use crate::plan::prefixed_alias;
use crate::response::ProxyValue;
use crate::schema::JoinSchema;

type GroupedFields<'a> = IndexMap<Name, Vec<&'a Node<executable::Field>>>;

/// The value is `null` and the error was already reported. A nullable
/// position turns this into `null`, a non-null one hands it to its parent.
#[derive(Debug)]
pub(crate) struct PropagateNull;

type Completion = Result<Value, PropagateNull>;

/// State of one client operation being executed.
pub(crate) struct ExecutionContext<'a> {
    join: &'a JoinSchema,
    document: &'a ExecutableDocument,
    variables: &'a Object,
    proxy: ProxyContext<'a>,
    errors: Mutex<Vec<graphql::Error>>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        join: &'a JoinSchema,
        document: &'a ExecutableDocument,
        variables: &'a Object,
        proxy: ProxyContext<'a>,
    ) -> Self {
        Self {
            join,
            document,
            variables,
            proxy,
            errors: Default::default(),
        }
    }

    pub(crate) fn into_errors(self) -> Vec<graphql::Error> {
        self.errors.into_inner()
    }

    /// Executes the root fields concurrently. `null` when a non-null root
    /// field failed.
    pub(crate) async fn execute_operation(&self, operation: &executable::Operation) -> Value {
        let root_type = &operation.selection_set.ty;
        let grouped = self.collect_fields(root_type, [&operation.selection_set]);
        let root = ProxyValue::Object(Default::default());
        match self
            .execute_grouped(root_type, &grouped, &root, &Path::empty())
            .await
        {
            Ok(data) => Value::Object(data),
            Err(PropagateNull) => Value::Null,
        }
    }

    fn collect_fields<'s>(
        &'s self,
        object_type: &Name,
        selection_sets: impl IntoIterator<Item = &'s executable::SelectionSet>,
    ) -> GroupedFields<'s> {
        let mut grouped = GroupedFields::new();
        let mut visited_fragments = IndexSet::new();
        for selection_set in selection_sets {
            self.collect_into(
                object_type,
                selection_set,
                &mut grouped,
                &mut visited_fragments,
            );
        }
        grouped
    }

    fn collect_into<'s>(
        &'s self,
        object_type: &Name,
        selection_set: &'s executable::SelectionSet,
        grouped: &mut GroupedFields<'s>,
        visited_fragments: &mut IndexSet<&'s Name>,
    ) {
        for selection in &selection_set.selections {
            match selection {
                executable::Selection::Field(field) => {
                    if is_included(&field.directives, self.variables) {
                        grouped
                            .entry(field.response_key().clone())
                            .or_default()
                            .push(field);
                    }
                }
                executable::Selection::FragmentSpread(spread) => {
                    if !is_included(&spread.directives, self.variables)
                        || !visited_fragments.insert(&spread.fragment_name)
                    {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name) else {
                        continue;
                    };
                    if self.type_applies(object_type, fragment.type_condition()) {
                        self.collect_into(
                            object_type,
                            &fragment.selection_set,
                            grouped,
                            visited_fragments,
                        );
                    }
                }
                executable::Selection::InlineFragment(inline) => {
                    let applies = inline
                        .type_condition
                        .as_ref()
                        .is_none_or(|condition| self.type_applies(object_type, condition));
                    if applies && is_included(&inline.directives, self.variables) {
                        self.collect_into(
                            object_type,
                            &inline.selection_set,
                            grouped,
                            visited_fragments,
                        );
                    }
                }
            }
        }
    }

    /// Whether a fragment on `condition` applies to objects of `object_type`.
    fn type_applies(&self, object_type: &Name, condition: &Name) -> bool {
        if condition == object_type {
            return true;
        }
        let types = &self.join.schema().types;
        match types.get(condition) {
            Some(ExtendedType::Union(union_type)) => union_type
                .members
                .iter()
                .any(|member| member.name == *object_type),
            Some(ExtendedType::Interface(_)) => matches!(
                types.get(object_type),
                Some(ExtendedType::Object(object))
                    if object
                        .implements_interfaces
                        .iter()
                        .any(|interface| interface.name == *condition)
            ),
            _ => false,
        }
    }

    async fn execute_grouped(
        &self,
        object_type: &Name,
        grouped: &GroupedFields<'_>,
        parent: &ProxyValue,
        path: &Path,
    ) -> Result<Object, PropagateNull> {
        let values = join_all(grouped.iter().map(|(key, fields)| {
            self.execute_field(object_type, parent, fields, path.join_key(key.as_str()))
        }))
        .await;
        let mut object = Object::new();
        for (key, value) in grouped.keys().zip(values) {
            object.insert(key.as_str(), value?);
        }
        Ok(object)
    }

    async fn execute_field(
        &self,
        object_type: &Name,
        parent: &ProxyValue,
        fields: &[&Node<executable::Field>],
        path: Path,
    ) -> Completion {
        let Some(field) = fields.first() else {
            return Ok(Value::Null);
        };
        if field.name.as_str() == "__typename" {
            return Ok(Value::String(object_type.as_str().into()));
        }
        let ty = &field.definition.ty;
        let resolved = if field.name.starts_with("__") {
            Err(graphql::Error::builder()
                .message(format!("introspection field `{}` is not supported", field.name))
                .extension_code("INTROSPECTION_DISABLED")
                .build())
        } else if let Some(plan) = self.join.resolve_with(object_type, &field.name) {
            self.resolve_with_plan(plan, parent, fields).await
        } else {
            Ok(parent_field_value(parent, field.response_key()))
        };
        match resolved {
            Ok(value) => self.complete_value(ty, fields, value, path).await,
            Err(error) => {
                self.report(error, path);
                if ty.is_non_null() {
                    Err(PropagateNull)
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    async fn resolve_with_plan(
        &self,
        plan: &ResolveWithArgs,
        parent: &ProxyValue,
        fields: &[&Node<executable::Field>],
    ) -> Result<ProxyValue, graphql::Error> {
        let mut arguments = fields
            .first()
            .map(|field| self.field_arguments(field))
            .unwrap_or_default();
        if let Some(fragment) = &plan.arguments_fragment {
            for (name, value) in fragment.extract_args(parent)? {
                arguments.insert(name, value);
            }
        }
        tracing::trace!(
            api = %plan.query.send_to(),
            operation = %plan.query.name(),
            "proxying field"
        );
        let call = plan.query.make_proxy_call(arguments);
        self.proxy
            .proxy_to_remote(call, fields)
            .await
            .map_err(|error| error.to_graphql_error(None))
    }

    /// The arguments of `field` as JSON, with defaults applied.
    fn field_arguments(&self, field: &executable::Field) -> Object {
        let mut arguments = Object::new();
        for definition in &field.definition.arguments {
            let provided = field
                .arguments
                .iter()
                .find(|argument| argument.name == definition.name)
                .and_then(|argument| value_to_json(&argument.value, self.variables));
            let value = provided.or_else(|| {
                definition
                    .default_value
                    .as_ref()
                    .and_then(|default| value_to_json(default, &Object::new()))
            });
            if let Some(value) = value {
                arguments.insert(definition.name.as_str(), value);
            }
        }
        arguments
    }

    fn complete_value<'s>(
        &'s self,
        ty: &'s ast::Type,
        fields: &'s [&'s Node<executable::Field>],
        value: ProxyValue,
        path: Path,
    ) -> BoxFuture<'s, Completion> {
        async move {
            let completed = match value {
                ProxyValue::Error(error) => {
                    self.report(*error, path.clone());
                    Err(PropagateNull)
                }
                ProxyValue::Null => Ok(Value::Null),
                value => match ty {
                    ast::Type::Named(name) | ast::Type::NonNullNamed(name) => {
                        self.complete_named(name, fields, value, &path).await
                    }
                    ast::Type::List(item) | ast::Type::NonNullList(item) => {
                        self.complete_list(item, fields, value, &path).await
                    }
                },
            };
            match completed {
                Ok(Value::Null) if ty.is_non_null() => {
                    let field_name = fields.first().map(|field| field.name.as_str()).unwrap_or_default();
                    self.report(
                        graphql::Error::builder()
                            .message(format!(
                                "Cannot return null for non-nullable field {field_name}"
                            ))
                            .build(),
                        path,
                    );
                    Err(PropagateNull)
                }
                Err(PropagateNull) if !ty.is_non_null() => Ok(Value::Null),
                completed => completed,
            }
        }
        .boxed()
    }

    async fn complete_named(
        &self,
        type_name: &Name,
        fields: &[&Node<executable::Field>],
        value: ProxyValue,
        path: &Path,
    ) -> Completion {
        match self.join.schema().types.get(type_name) {
            Some(ExtendedType::Object(_)) => {
                self.complete_object(type_name, fields, value, path).await
            }
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                match self.runtime_type(&value) {
                    Some(object_type) => {
                        self.complete_object(&object_type, fields, value, path)
                            .await
                    }
                    None => {
                        self.report(
                            graphql::Error::builder()
                                .message(format!(
                                    "could not determine the runtime type of `{type_name}`"
                                ))
                                .build(),
                            path.clone(),
                        );
                        Err(PropagateNull)
                    }
                }
            }
            // scalars and enums are passed through as the origin sent them
            _ => value.to_json().map_err(|error| {
                self.report(error, path.clone());
                PropagateNull
            }),
        }
    }

    /// The join type of an abstract value, read from the `__typename` marker
    /// its origin answered with.
    fn runtime_type(&self, value: &ProxyValue) -> Option<Name> {
        let ProxyValue::Object(fields) = value else {
            return None;
        };
        fields.iter().find_map(|(key, value)| {
            let api = key.strip_prefix(TYPENAME_ALIAS_PREFIX)?;
            match value {
                ProxyValue::Leaf(Value::String(type_name)) => {
                    self.join.join_type_name(api, type_name.as_str()).cloned()
                }
                _ => None,
            }
        })
    }

    async fn complete_object(
        &self,
        object_type: &Name,
        fields: &[&Node<executable::Field>],
        value: ProxyValue,
        path: &Path,
    ) -> Completion {
        if !matches!(value, ProxyValue::Object(_)) {
            self.report(
                graphql::Error::builder()
                    .message(format!("expected an object of type `{object_type}`"))
                    .build(),
                path.clone(),
            );
            return Err(PropagateNull);
        }
        let grouped =
            self.collect_fields(object_type, fields.iter().map(|field| &field.selection_set));
        self.execute_grouped(object_type, &grouped, &value, path)
            .await
            .map(Value::Object)
    }

    async fn complete_list(
        &self,
        item_type: &ast::Type,
        fields: &[&Node<executable::Field>],
        value: ProxyValue,
        path: &Path,
    ) -> Completion {
        let ProxyValue::List(items) = value else {
            self.report(
                graphql::Error::builder()
                    .message("expected a list")
                    .build(),
                path.clone(),
            );
            return Err(PropagateNull);
        };
        let completed = join_all(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| self.complete_value(item_type, fields, item, path.join_index(index))),
        )
        .await;
        completed
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    /// Records a field error at `path`. Locations an origin reported refer to
    /// the origin document and are dropped.
    fn report(&self, error: graphql::Error, path: Path) {
        self.errors.lock().push(graphql::Error {
            path: Some(path),
            locations: Vec::new(),
            ..error
        });
    }
}

/// Reads a field the parent was fetched with.
fn parent_field_value(parent: &ProxyValue, response_key: &str) -> ProxyValue {
    parent
        .get(&prefixed_alias(response_key))
        .or_else(|| parent.get(response_key))
        .cloned()
        .unwrap_or_default()
}
