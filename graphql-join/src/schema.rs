//! The joined schema and the side tables describing where its types come from.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;
use itertools::Itertools;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ast::SplitDocument;
use crate::ast::is_builtin_type;
use crate::ast::merge_into_schema;
use crate::ast::prefix_type;
use crate::ast::schema_to_type_defs;
use crate::ast::split_document;
use crate::ast::types_with_dependencies;
use crate::ast::validate_prefix;
use crate::ast::visitor::type_references;
use crate::directives::JoinDirectives;
use crate::directives::RESOLVE_WITH_DIRECTIVE;
use crate::directives::ResolveWithDirectiveArgs;
use crate::error::JoinError;
use crate::plan::ArgumentsFragment;
use crate::plan::ProxyOperation;
use crate::plan::ResolveWithArgs;

/// The type system of one origin API.
#[derive(Debug, Clone)]
pub struct RemoteSchema {
    pub schema: Valid<Schema>,
    /// Prepended to the name of every non-builtin type the API contributes.
    pub prefix: Option<String>,
}

impl RemoteSchema {
    pub fn new(schema: Valid<Schema>) -> Self {
        Self {
            schema,
            prefix: None,
        }
    }

    pub fn with_prefix(schema: Valid<Schema>, prefix: impl Into<String>) -> Self {
        Self {
            schema,
            prefix: Some(prefix.into()),
        }
    }
}

/// Origin schemas keyed by API name.
pub type RemoteSchemas = IndexMap<String, RemoteSchema>;

/// Origin type names keyed by API name.
pub type TypeOrigins = IndexMap<String, Name>;

/// A schema joining several origin APIs, with the plan to resolve each of its fields.
///
/// Built once from a join IDL and the origin schemas, then shared by every request.
#[derive(Debug, Clone)]
pub struct JoinSchema {
    schema: Valid<Schema>,
    /// Join type name to where it was imported from.
    origins: IndexMap<Name, TypeOrigins>,
    /// API name to origin type name to join type name.
    origin_to_join: IndexMap<String, IndexMap<Name, Name>>,
    /// Type name to field name to resolve plan.
    resolve_with_map: IndexMap<Name, IndexMap<Name, ResolveWithArgs>>,
    /// API name to its schema, which types the arguments sent to it.
    origin_schemas: IndexMap<String, Valid<Schema>>,
}

struct PlannedField {
    type_name: Name,
    field_name: Name,
    args: ResolveWithDirectiveArgs,
}

struct ImportedType {
    api: String,
    definition: ast::Definition,
}

impl JoinSchema {
    /// Builds the joined schema with the default directive registry.
    pub fn parse(join_idl: &str, remote_schemas: &RemoteSchemas) -> Result<Self, JoinError> {
        Self::new(&JoinDirectives::new(), join_idl, remote_schemas)
    }

    #[tracing::instrument(skip_all, level = "debug")]
    pub fn new(
        directives: &JoinDirectives,
        join_idl: &str,
        remote_schemas: &RemoteSchemas,
    ) -> Result<Self, JoinError> {
        let document = ast::Document::parse(join_idl, "join.graphql")
            .map_err(|invalid| JoinError::Parse(invalid.errors.to_string()))?;
        let diagnostics = directives.validate(&document);
        if !diagnostics.0.is_empty() {
            return Err(JoinError::InvalidDirectives(diagnostics));
        }
        for api in remote_schemas.keys() {
            Name::new(api).map_err(|_| JoinError::InvalidName { name: api.clone() })?;
        }

        let split = split_document(&document);
        let schema_definition = match split.schema_definitions.as_slice() {
            [] => return Err(JoinError::MissingSchemaDefinition),
            [definition] => definition.clone(),
            _ => return Err(JoinError::DuplicateSchemaDefinition),
        };
        if !schema_definition
            .root_operations
            .iter()
            .any(|root| root.0 == ast::OperationType::Query)
        {
            return Err(JoinError::MissingQueryRoot);
        }

        let external = external_type_names(&split);
        let mut imported: IndexMap<Name, ImportedType> = IndexMap::new();
        let mut origins: IndexMap<Name, TypeOrigins> = IndexMap::new();
        let mut origin_to_join: IndexMap<String, IndexMap<Name, Name>> = IndexMap::new();
        for (api, remote) in remote_schemas {
            let prefix = remote.prefix.as_deref().unwrap_or_default();
            validate_prefix(prefix)?;
            let origin_types = schema_to_type_defs(&remote.schema)?;
            let roots = external
                .iter()
                .filter_map(|name| Name::new(name.strip_prefix(prefix)?).ok());

            let closure = types_with_dependencies(&origin_types, roots);
            debug!(api = %api, count = closure.len(), "importing types");
            for origin_name in closure {
                let Some(definition) = origin_types.get(&origin_name) else {
                    continue;
                };
                let definition = prefix_type(definition, prefix)?;
                let Some(join_name) = definition.name().cloned() else {
                    continue;
                };
                if split.types.contains_key(&join_name) {
                    return Err(JoinError::TypeConflict {
                        type_name: join_name.to_string(),
                        api: api.clone(),
                        other_api: "join IDL".to_string(),
                    });
                }
                match imported.get(&join_name) {
                    Some(existing) if existing.definition != definition => {
                        return Err(JoinError::TypeConflict {
                            type_name: join_name.to_string(),
                            api: api.clone(),
                            other_api: existing.api.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        imported.insert(
                            join_name.clone(),
                            ImportedType {
                                api: api.clone(),
                                definition,
                            },
                        );
                    }
                }
                origins
                    .entry(join_name.clone())
                    .or_default()
                    .insert(api.clone(), origin_name.clone());
                origin_to_join
                    .entry(api.clone())
                    .or_default()
                    .insert(origin_name, join_name);
            }
        }
        if let Some(unknown) = external.iter().find(|name| !imported.contains_key(*name)) {
            return Err(JoinError::UnknownType {
                type_name: unknown.to_string(),
            });
        }

        let mut planned = Vec::new();
        let join_types: Vec<_> = split
            .types
            .values()
            .map(|definition| take_resolve_with(directives, definition, &mut planned))
            .collect();
        let extensions: Vec<_> = split
            .extensions
            .iter()
            .map(|definition| take_resolve_with(directives, definition, &mut planned))
            .collect();
        let directive_definitions = split
            .directive_definitions
            .iter()
            .filter(|definition| !JoinDirectives::is_join_directive(&definition.name))
            .cloned();
        let schema = merge_into_schema(
            schema_definition,
            join_types.into_iter().chain(
                imported
                    .into_values()
                    .map(|imported_type| imported_type.definition),
            ),
            directive_definitions,
            extensions,
        )?;

        let mut operations: IndexMap<Name, Arc<ProxyOperation>> = IndexMap::new();
        for operation in &split.operations {
            let operation = ProxyOperation::new(directives, operation)?;
            if !remote_schemas.contains_key(operation.send_to()) {
                return Err(JoinError::UnknownApi {
                    operation: operation.name().to_string(),
                    api: operation.send_to().to_string(),
                });
            }
            operations.insert(operation.name().clone(), Arc::new(operation));
        }
        let mut fragments: IndexMap<Name, Arc<ArgumentsFragment>> = IndexMap::new();
        for fragment in split.fragments.values() {
            if !schema.types.contains_key(&fragment.type_condition) {
                return Err(JoinError::UnknownFragmentType {
                    fragment: fragment.name.to_string(),
                    type_name: fragment.type_condition.to_string(),
                });
            }
            fragments.insert(
                fragment.name.clone(),
                Arc::new(ArgumentsFragment::new(directives, fragment)?),
            );
        }

        let mut resolve_with_map: IndexMap<Name, IndexMap<Name, ResolveWithArgs>> =
            IndexMap::new();
        for PlannedField {
            type_name,
            field_name,
            args,
        } in planned
        {
            let query = operations
                .get(args.query.as_str())
                .cloned()
                .ok_or_else(|| JoinError::UnknownOperation {
                    type_name: type_name.to_string(),
                    field_name: field_name.to_string(),
                    operation: args.query.clone(),
                })?;
            let arguments_fragment = args
                .from_fragment
                .as_deref()
                .map(|fragment| {
                    fragments.get(fragment).cloned().ok_or_else(|| {
                        JoinError::UnknownFragment {
                            type_name: type_name.to_string(),
                            field_name: field_name.to_string(),
                            fragment: fragment.to_string(),
                        }
                    })
                })
                .transpose()?;
            if args.transform_args.is_some() {
                warn!(
                    type_name = %type_name,
                    field_name = %field_name,
                    "transformArgs is not supported and will be ignored"
                );
            }
            resolve_with_map.entry(type_name).or_default().insert(
                field_name,
                ResolveWithArgs {
                    query,
                    arguments_fragment,
                },
            );
        }

        for (operation_type, root) in [
            (ast::OperationType::Query, &schema.schema_definition.query),
            (ast::OperationType::Mutation, &schema.schema_definition.mutation),
        ] {
            let Some(root) = root else {
                continue;
            };
            let Some(ExtendedType::Object(object)) = schema.types.get(&root.name) else {
                continue;
            };
            let apis: Vec<&String> = origins
                .get(&root.name)
                .map(|root_origins| root_origins.keys().collect())
                .unwrap_or_default();
            let planned_fields = resolve_with_map.entry(root.name.clone()).or_default();
            for field in object.fields.values() {
                if planned_fields.contains_key(&field.name) {
                    continue;
                }
                let query = match apis.as_slice() {
                    [api] => {
                        let origin_field = origins
                            .get(&root.name)
                            .and_then(|root_origins| root_origins.get(*api))
                            .and_then(|origin_root| {
                                remote_schemas.get(*api)?.schema.get_object(origin_root)
                            })
                            .and_then(|origin_root| origin_root.fields.get(&field.name));
                        ProxyOperation::pass_through(
                            api,
                            operation_type,
                            origin_field.unwrap_or(field),
                        )
                    }
                    [] => {
                        return Err(JoinError::MissingResolvePlan {
                            type_name: root.name.to_string(),
                            field_name: field.name.to_string(),
                        });
                    }
                    _ => {
                        return Err(JoinError::AmbiguousRootField {
                            type_name: root.name.to_string(),
                            field_name: field.name.to_string(),
                            apis: apis.iter().join(", "),
                        });
                    }
                };
                planned_fields.insert(
                    field.name.clone(),
                    ResolveWithArgs {
                        query: Arc::new(query),
                        arguments_fragment: None,
                    },
                );
            }
        }
        resolve_with_map.retain(|_, fields| !fields.is_empty());

        info!(
            types = schema.types.len(),
            imported = origins.len(),
            operations = operations.len(),
            "joined schema built"
        );
        let origin_schemas = remote_schemas
            .iter()
            .map(|(api, remote)| (api.clone(), remote.schema.clone()))
            .collect();
        Ok(Self {
            schema,
            origins,
            origin_to_join,
            resolve_with_map,
            origin_schemas,
        })
    }

    /// The joined, client-facing schema.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// The APIs providing join type `type_name` and its name in each of them.
    pub fn type_origins(&self, type_name: &str) -> Option<&TypeOrigins> {
        self.origins.get(type_name)
    }

    /// The name of join type `type_name` in API `api`.
    ///
    /// Built-in types keep their name. Types the API does not provide have none.
    pub fn origin_type_name(&self, api: &str, type_name: &Name) -> Option<Name> {
        if is_builtin_type(type_name) {
            return Some(type_name.clone());
        }
        self.origins.get(type_name)?.get(api).cloned()
    }

    /// The join type API `api` type `origin_type_name` was imported as.
    pub fn join_type_name(&self, api: &str, origin_type_name: &str) -> Option<&Name> {
        self.origin_to_join.get(api)?.get(origin_type_name)
    }

    /// The schema of API `api`.
    pub fn origin_schema(&self, api: &str) -> Option<&Valid<Schema>> {
        self.origin_schemas.get(api)
    }

    /// The resolve plan of `type_name.field_name`, explicit or root pass-through.
    pub fn resolve_with(&self, type_name: &str, field_name: &str) -> Option<&ResolveWithArgs> {
        self.resolve_with_map.get(type_name)?.get(field_name)
    }
}

/// Named types referenced by the schema, type and extension definitions of the
/// join IDL but not defined there, extension targets included.
fn external_type_names(split: &SplitDocument) -> IndexSet<Name> {
    let mut referenced = IndexSet::new();
    for schema_definition in &split.schema_definitions {
        referenced.extend(type_references(&ast::Definition::SchemaDefinition(
            schema_definition.clone(),
        )));
    }
    for definition in split.types.values() {
        referenced.extend(type_references(definition));
    }
    for extension in &split.extensions {
        referenced.extend(extension.name().cloned());
        referenced.extend(type_references(extension));
    }
    referenced.retain(|name| !is_builtin_type(name) && !split.types.contains_key(name));
    referenced
}

/// Removes `@resolveWith` from the fields of `definition`, recording the
/// arguments of those on object types in `planned`.
fn take_resolve_with(
    directives: &JoinDirectives,
    definition: &ast::Definition,
    planned: &mut Vec<PlannedField>,
) -> ast::Definition {
    let mut definition = definition.clone();
    match &mut definition {
        ast::Definition::ObjectTypeDefinition(object) => {
            let object = object.make_mut();
            take_from_fields(directives, &object.name, &mut object.fields, Some(planned));
        }
        ast::Definition::ObjectTypeExtension(object) => {
            let object = object.make_mut();
            take_from_fields(directives, &object.name, &mut object.fields, Some(planned));
        }
        ast::Definition::InterfaceTypeDefinition(interface) => {
            let interface = interface.make_mut();
            take_from_fields(directives, &interface.name, &mut interface.fields, None);
        }
        ast::Definition::InterfaceTypeExtension(interface) => {
            let interface = interface.make_mut();
            take_from_fields(directives, &interface.name, &mut interface.fields, None);
        }
        _ => {}
    }
    definition
}

fn take_from_fields(
    directives: &JoinDirectives,
    type_name: &Name,
    fields: &mut [Node<ast::FieldDefinition>],
    mut planned: Option<&mut Vec<PlannedField>>,
) {
    for field in fields {
        if field.directives.get(RESOLVE_WITH_DIRECTIVE).is_none() {
            continue;
        }
        let field = field.make_mut();
        match (directives.resolve_with(&field.directives), planned.as_deref_mut()) {
            (Some(args), Some(planned)) => planned.push(PlannedField {
                type_name: type_name.clone(),
                field_name: field.name.clone(),
                args,
            }),
            _ => warn!(
                type_name = %type_name,
                field_name = %field.name,
                "@resolveWith is only supported on object type fields and will be ignored"
            ),
        }
        field
            .directives
            .0
            .retain(|directive| directive.name != RESOLVE_WITH_DIRECTIVE);
    }
}
