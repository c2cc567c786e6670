//! Coalesces the origin calls issued while one execution runs.
//!
//! Every call is queued per `(API, operation type)`. When the execution can
//! make no more progress on its own, each queue is sent as one operation: the
//! top-level fields of call `i` are aliased `_<i>_<key>` and the response is
//! split back into one `{data, errors}` slice per call.

use std::future::poll_fn;
use std::pin::pin;
use std::task::Poll;

use apollo_compiler::ast;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::ast::operation_document;
use crate::ast::prefix_top_level_fields;
use crate::error::FetchError;
use crate::fetcher::Fetchers;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

type Waiter = oneshot::Sender<Result<graphql::Response, FetchError>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct QueueKey {
    service: String,
    operation_type: ast::OperationType,
}

struct PendingCall {
    selection_set: Vec<ast::Selection>,
    waiter: Waiter,
}

/// Pending origin calls of one execution.
pub struct BatchDispatcher<'a> {
    fetchers: &'a Fetchers,
    queues: Mutex<IndexMap<QueueKey, Vec<PendingCall>>>,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(fetchers: &'a Fetchers) -> Self {
        Self {
            fetchers,
            queues: Default::default(),
        }
    }

    /// Queues `selection_set` for `service`. The returned future resolves once
    /// the queue was flushed and the origin answered.
    pub fn load(
        &self,
        service: &str,
        operation_type: ast::OperationType,
        selection_set: Vec<ast::Selection>,
    ) -> impl Future<Output = Result<graphql::Response, FetchError>> + use<> {
        let (waiter, receiver) = oneshot::channel();
        self.queues
            .lock()
            .entry(QueueKey {
                service: service.to_string(),
                operation_type,
            })
            .or_default()
            .push(PendingCall {
                selection_set,
                waiter,
            });
        let service = service.to_string();
        async move {
            receiver.await.unwrap_or_else(|_| {
                Err(FetchError::SubrequestBatchingError {
                    service,
                    reason: "the batch was dropped before it was sent".to_string(),
                })
            })
        }
    }

    pub fn has_pending(&self) -> bool {
        self.queues.lock().values().any(|calls| !calls.is_empty())
    }

    fn take_batches(&self) -> IndexMap<QueueKey, Vec<PendingCall>> {
        std::mem::take(&mut *self.queues.lock())
    }

    /// Sends every pending queue and waits for the answers to be delivered.
    pub async fn flush(&self) {
        join_all(
            self.take_batches()
                .into_iter()
                .map(|(key, calls)| self.dispatch(key, calls)),
        )
        .await;
    }

    /// Drives `future` to completion, flushing the queues whenever it is
    /// waiting and calls are pending.
    pub async fn run<F: Future>(&self, future: F) -> F::Output {
        let mut future = pin!(future);
        let mut in_flight = FuturesUnordered::new();
        poll_fn(|cx| {
            loop {
                if let Poll::Ready(output) = future.as_mut().poll(cx) {
                    return Poll::Ready(output);
                }
                let batches = self.take_batches();
                if batches.is_empty() {
                    match in_flight.poll_next_unpin(cx) {
                        Poll::Ready(Some(_)) => continue,
                        Poll::Ready(None) | Poll::Pending => return Poll::Pending,
                    }
                }
                in_flight.extend(
                    batches
                        .into_iter()
                        .map(|(key, calls)| self.dispatch(key, calls)),
                );
            }
        })
        .await
    }

    #[tracing::instrument(
        skip_all,
        level = "debug",
        fields(service = %key.service, operation_type = ?key.operation_type, calls = calls.len())
    )]
    async fn dispatch(&self, key: QueueKey, mut calls: Vec<PendingCall>) {
        if calls.len() == 1 {
            if let Some(call) = calls.pop() {
                let response = self.fetch(&key, call.selection_set).await;
                let _ = call.waiter.send(response);
            }
            return;
        }

        let mut selection_set = Vec::new();
        let mut batched = Vec::with_capacity(calls.len());
        for (index, call) in calls.into_iter().enumerate() {
            match prefix_top_level_fields(&call.selection_set, &batch_prefix(index)) {
                Ok(prefixed) => {
                    selection_set.extend(prefixed);
                    batched.push(Some(call.waiter));
                }
                Err(error) => {
                    let _ = call.waiter.send(Err(error));
                    batched.push(None);
                }
            }
        }

        tracing::debug!("sending batched operation");
        match self.fetch(&key, selection_set).await {
            Ok(response) => {
                let slices = demultiplex(&key.service, response, batched.len());
                for (waiter, slice) in batched.into_iter().zip(slices) {
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(slice);
                    }
                }
            }
            Err(error) => {
                for waiter in batched.into_iter().flatten() {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
        }
    }

    async fn fetch(
        &self,
        key: &QueueKey,
        selection_set: Vec<ast::Selection>,
    ) -> Result<graphql::Response, FetchError> {
        let fetcher = self
            .fetchers
            .get(&key.service)
            .ok_or_else(|| FetchError::UnknownService {
                service: key.service.clone(),
            })?;
        let document = operation_document(key.operation_type, selection_set);
        fetcher.fetch(&document, &Object::new()).await
    }
}

fn batch_prefix(index: usize) -> String {
    format!("_{index}_")
}

/// Splits a batched response key into the call index and the original key.
fn split_batch_alias(key: &str) -> Option<(usize, &str)> {
    let (index, key) = key.strip_prefix('_')?.split_once('_')?;
    Some((index.parse().ok()?, key))
}

/// Splits a batched response into one response per call.
///
/// Errors located under a call's fields go to that call with the batch prefix
/// removed from their path; every other error goes to all calls.
fn demultiplex(
    service: &str,
    response: graphql::Response,
    count: usize,
) -> Vec<Result<graphql::Response, FetchError>> {
    let mut data: Vec<Option<Object>> = vec![None; count];
    match response.data {
        Some(Value::Object(object)) => {
            data.iter_mut()
                .for_each(|slice| *slice = Some(Object::new()));
            for (key, value) in object {
                match split_batch_alias(key.as_str()) {
                    Some((index, original)) if index < count => {
                        if let Some(slice) = data[index].as_mut() {
                            slice.insert(original, value);
                        }
                    }
                    _ => tracing::debug!(key = key.as_str(), "ignoring unexpected key in batched response"),
                }
            }
        }
        None | Some(Value::Null) => {}
        Some(_) => {
            let error = FetchError::SubrequestMalformedResponse {
                service: service.to_string(),
                reason: "`data` must be an object".to_string(),
            };
            return vec![Err(error); count];
        }
    }

    let mut errors: Vec<Vec<graphql::Error>> = vec![Vec::new(); count];
    for error in response.errors {
        let routed = error
            .path
            .as_ref()
            .and_then(|path| path.first())
            .and_then(PathElement::as_key)
            .and_then(split_batch_alias)
            .filter(|(index, _)| *index < count)
            .map(|(index, original)| (index, original.to_string()));
        match (routed, &error.path) {
            (Some((index, original)), Some(path)) => {
                let path = Path(
                    std::iter::once(PathElement::Key(original))
                        .chain(path.tail().0)
                        .collect(),
                );
                errors[index].push(error.with_path(path));
            }
            _ => {
                for call_errors in errors.iter_mut() {
                    call_errors.push(error.clone());
                }
            }
        }
    }

    data.into_iter()
        .zip(errors)
        .map(|(data, errors)| {
            Ok(graphql::Response::builder()
                .and_data(data.map(Value::Object))
                .errors(errors)
                .build())
        })
        .collect()
}
