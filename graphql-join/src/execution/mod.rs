//! Executes client operations against a [`JoinSchema`].
//!
//! Fields with a resolve plan are proxied to their origin API. Everything
//! else is read from the value the parent was fetched with.

mod engine;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::ast::OperationType;
use apollo_compiler::executable;
use apollo_compiler::request::coerce_variable_values;

use self::engine::ExecutionContext;
use crate::batching::BatchDispatcher;
use crate::error::FetchError;
use crate::fetcher::Fetchers;
use crate::graphql;
use crate::json_ext::Object;
use crate::plan::ProxyCall;
use crate::response::ProxyValue;
use crate::rewrite::QueryRewriter;
use crate::schema::JoinSchema;

/// Sends proxy calls for one client request.
pub(crate) struct ProxyContext<'a> {
    join: &'a JoinSchema,
    document: &'a ExecutableDocument,
    operation: &'a executable::Operation,
    variables: &'a Object,
    dispatcher: &'a BatchDispatcher<'a>,
}

impl<'a> ProxyContext<'a> {
    pub(crate) fn new(
        join: &'a JoinSchema,
        document: &'a ExecutableDocument,
        operation: &'a executable::Operation,
        variables: &'a Object,
        dispatcher: &'a BatchDispatcher<'a>,
    ) -> Self {
        Self {
            join,
            document,
            operation,
            variables,
            dispatcher,
        }
    }

    /// Fetches the value of a planned field: the client's sub-selection of
    /// `fields` is rewritten for the origin and spliced into the call.
    pub(crate) async fn proxy_to_remote(
        &self,
        call: ProxyCall<'_>,
        fields: &[&Node<executable::Field>],
    ) -> Result<ProxyValue, FetchError> {
        let origin_schema = self
            .join
            .origin_schema(call.send_to())
            .ok_or_else(|| FetchError::UnknownService {
                service: call.send_to().to_string(),
            })?;
        let rewriter = QueryRewriter::new(
            self.join,
            self.document,
            self.operation,
            self.variables,
            call.send_to(),
        );
        let client_selection = rewriter.rewrite_field_selection(fields)?;
        let selection_set = call.make_selection_set(client_selection.as_deref(), origin_schema)?;
        let response = self
            .dispatcher
            .load(call.send_to(), call.operation_type(), selection_set)
            .await?;
        call.make_root_value(response)
    }
}

impl JoinSchema {
    /// Executes `request` against the joined schema, fetching from the APIs
    /// in `fetchers`.
    ///
    /// Request errors produce a response without `data`. Field errors are
    /// reported next to the partial `data`.
    #[tracing::instrument(skip_all, level = "debug", fields(operation_name = ?request.operation_name))]
    pub async fn execute(&self, fetchers: &Fetchers, request: &graphql::Request) -> graphql::Response {
        let Some(query) = request.query.as_deref() else {
            return request_error(
                graphql::Error::builder()
                    .message("Must provide query string.")
                    .extension_code("MISSING_QUERY_STRING")
                    .build(),
            );
        };
        let document = match ExecutableDocument::parse_and_validate(self.schema(), query, "query.graphql")
        {
            Ok(document) => document,
            Err(invalid) => {
                return graphql::Response::builder()
                    .errors(
                        invalid
                            .errors
                            .iter()
                            .map(|diagnostic| diagnostic.to_json().into())
                            .collect(),
                    )
                    .build();
            }
        };
        let operation = match document.operations.get(request.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(error) => return request_error(error.to_graphql_error(&document.sources).into()),
        };
        if operation.operation_type == OperationType::Subscription {
            return request_error(
                graphql::Error::builder()
                    .message("subscriptions are not supported")
                    .extension_code("SUBSCRIPTION_NOT_SUPPORTED")
                    .build(),
            );
        }
        let variables = match coerce_variable_values(self.schema(), operation, &request.variables) {
            Ok(variables) => variables.into_inner(),
            Err(error) => return request_error(error.to_graphql_error(&document.sources).into()),
        };

        let dispatcher = BatchDispatcher::new(fetchers);
        let proxy = ProxyContext::new(self, &document, operation, &variables, &dispatcher);
        let context = ExecutionContext::new(self, &document, &variables, proxy);
        let data = dispatcher.run(context.execute_operation(operation)).await;
        let errors = context.into_errors();
        tracing::debug!(errors = errors.len(), "operation executed");
        graphql::Response::builder()
            .data(data)
            .errors(errors)
            .build()
    }
}

fn request_error(error: graphql::Error) -> graphql::Response {
    graphql::Response::builder().errors(vec![error]).build()
}
