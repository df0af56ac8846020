//! Search backend seam: the trait, the Solr-style HTTP client, and a mock.
//!
//! The backend is an opaque external service reached by query/response. A
//! transport or protocol failure is fatal for the whole resolution, since
//! every later hypothesis would hit the same wall.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::SearchQuery;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("malformed backend response: {0}")]
    Protocol(String),
}

/// One read-only result row from the backend.
///
/// List-valued fields arrive as arrays even when singular; `pub` is the
/// venue text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub bibcode: String,
    #[serde(default)]
    pub author: Vec<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub page: Vec<String>,
    #[serde(rename = "pub", default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub doi: Vec<String>,
    #[serde(default)]
    pub identifier: Vec<String>,
    #[serde(default)]
    pub doctype: Option<String>,
}

impl CandidateRecord {
    pub fn first_page(&self) -> Option<&str> {
        self.page.first().map(String::as_str)
    }

    pub fn first_title(&self) -> Option<&str> {
        self.title.first().map(String::as_str)
    }
}

/// A candidate set plus the backend's total hit count, which may exceed
/// the returned rows and signals overflow to the solve loop.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub num_found: usize,
    pub docs: Vec<CandidateRecord>,
}

/// The query seam. One call per attempted hypothesis.
pub trait SearchBackend: Send + Sync {
    fn search<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse, BackendError>> + Send + 'a>>;
}

#[derive(Deserialize)]
struct SolrEnvelope {
    response: SolrResponse,
}

#[derive(Deserialize)]
struct SolrResponse {
    #[serde(rename = "numFound")]
    num_found: usize,
    docs: Vec<CandidateRecord>,
}

/// HTTP client for a Solr-style search endpoint.
pub struct SolrBackend {
    client: reqwest::Client,
    base_url: String,
}

impl SolrBackend {
    /// `base_url` is the collection root; `/select` is appended per query.
    /// Every request carries the given timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_url(&self, query: &SearchQuery) -> String {
        format!(
            "{}/select?q={}&rows={}&fl={}&wt=json",
            self.base_url,
            urlencoding::encode(&query.q),
            query.rows,
            query.fields.join(",")
        )
    }
}

impl SearchBackend for SolrBackend {
    fn search<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.request_url(query);
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(BackendError::Status(status.as_u16()));
            }
            let envelope: SolrEnvelope = response
                .json()
                .await
                .map_err(|e| BackendError::Protocol(e.to_string()))?;
            Ok(SearchResponse {
                num_found: envelope.response.num_found,
                docs: envelope.response.docs,
            })
        })
    }
}

/// A configurable mock response for [`MockBackend`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// A candidate set with `num_found` equal to the row count.
    Rows(Vec<CandidateRecord>),
    /// A candidate set with an explicit (possibly larger) hit count.
    Overflow { num_found: usize },
    /// A protocol failure.
    Error(String),
}

/// Scripted backend for tests: responses are consumed in order, with an
/// empty result once the script is exhausted. Records every query string
/// and counts calls.
#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<Vec<MockResponse>>,
    queries: Mutex<Vec<String>>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockBackend {
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        // Reverse so each call can pop() from the front cheaply.
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            queries: Mutex::new(Vec::new()),
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `search()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every query string seen, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn next_response(&self) -> Option<MockResponse> {
        self.responses.lock().unwrap().pop()
    }
}

impl SearchBackend for MockBackend {
    fn search<'a>(
        &'a self,
        query: &'a SearchQuery,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse, BackendError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.q.clone());
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match response {
                Some(MockResponse::Rows(docs)) => Ok(SearchResponse {
                    num_found: docs.len(),
                    docs,
                }),
                Some(MockResponse::Overflow { num_found }) => Ok(SearchResponse {
                    num_found,
                    docs: Vec::new(),
                }),
                Some(MockResponse::Error(message)) => Err(BackendError::Protocol(message)),
                None => Ok(SearchResponse::default()),
            }
        })
    }
}
