/*
 * Copyright 2019 Cargill Incorporated
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 * -----------------------------------------------------------------------------
 */

//! Paging of query results back to the chaincode.

use std::error::Error;
use std::fmt;

use super::TransactionContext;
use crate::ledger::LedgerError;
use crate::protocol::payload::{QueryResponse, QueryResultBytes};
use crate::protocol::PayloadError;

#[derive(Debug)]
pub enum QueryResponseError {
    IteratorNotFound(String),
    LedgerError(LedgerError),
    PayloadError(PayloadError),
}

impl Error for QueryResponseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            QueryResponseError::IteratorNotFound(_) => None,
            QueryResponseError::LedgerError(ref err) => Some(err),
            QueryResponseError::PayloadError(ref err) => Some(err),
        }
    }
}

impl fmt::Display for QueryResponseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryResponseError::IteratorNotFound(_) => f.write_str("query iterator not found"),
            QueryResponseError::LedgerError(err) => {
                write!(f, "failed to get query result: {}", err)
            }
            QueryResponseError::PayloadError(err) => {
                write!(f, "failed to marshal query result: {}", err)
            }
        }
    }
}

enum PageOutcome {
    More(Vec<QueryResultBytes>),
    Exhausted(Vec<QueryResultBytes>),
    Failed(QueryResponseError),
}

/// Cuts pages of at most `max_result_limit` results from a context's query iterators.
#[derive(Debug, Clone)]
pub struct QueryResponseBuilder {
    max_result_limit: usize,
}

impl QueryResponseBuilder {
    pub fn new(max_result_limit: usize) -> Self {
        QueryResponseBuilder { max_result_limit }
    }

    /// Reads the next page of the iterator `id`.
    ///
    /// Once the iterator is exhausted the page is returned with `has_more` unset and the
    /// iterator is cleaned up. An iterator error also cleans the iterator up.
    pub fn build_query_response(
        &self,
        context: &TransactionContext,
        id: &str,
    ) -> Result<QueryResponse, QueryResponseError> {
        let max = self.max_result_limit;
        let outcome = context
            .with_query_context(id, |query_context| loop {
                let result = match query_context.iterator.next() {
                    Ok(Some(result)) => result,
                    Ok(None) => {
                        return PageOutcome::Exhausted(query_context.pending.drain(..).collect())
                    }
                    Err(err) => return PageOutcome::Failed(QueryResponseError::LedgerError(err)),
                };
                let result_bytes = match result.into_bytes() {
                    Ok(result_bytes) => result_bytes,
                    Err(err) => return PageOutcome::Failed(QueryResponseError::PayloadError(err)),
                };

                if query_context.pending.len() == max {
                    let batch = query_context.pending.drain(..).collect();
                    query_context.pending.push(QueryResultBytes { result_bytes });
                    return PageOutcome::More(batch);
                }
                query_context.pending.push(QueryResultBytes { result_bytes });
            })
            .ok_or_else(|| QueryResponseError::IteratorNotFound(id.to_string()))?;

        match outcome {
            PageOutcome::More(results) => Ok(QueryResponse {
                results,
                has_more: true,
                id: id.to_string(),
            }),
            PageOutcome::Exhausted(results) => {
                context.cleanup_query_context(id);
                Ok(QueryResponse {
                    results,
                    has_more: false,
                    id: id.to_string(),
                })
            }
            PageOutcome::Failed(err) => {
                context.cleanup_query_context(id);
                Err(err)
            }
        }
    }
}
