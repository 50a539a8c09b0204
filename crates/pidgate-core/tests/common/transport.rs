//! Scripted in-memory transport

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pidgate_core::{Headers, HttpError, HttpResponse, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub follow_redirects: bool,
}

/// Answers from a table keyed by URL; anything unscripted is a 404
#[derive(Default)]
pub struct MockTransport {
    gets: Mutex<HashMap<String, Result<HttpResponse, HttpError>>>,
    heads: Mutex<HashMap<String, Result<HttpResponse, HttpError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_get(&self, url: &str, body: &str) -> &Self {
        self.on_get_redirect(url, url, body)
    }

    /// GET `url` lands on `effective_url`
    pub fn on_get_redirect(&self, url: &str, effective_url: &str, body: &str) -> &Self {
        let response = HttpResponse {
            effective_url: effective_url.to_string(),
            status: 200,
            body: body.to_string(),
            headers: HashMap::new(),
        };
        self.gets.lock().unwrap().insert(url.to_string(), Ok(response));
        self
    }

    pub fn on_get_error(&self, url: &str, error: HttpError) -> &Self {
        self.gets.lock().unwrap().insert(url.to_string(), Err(error));
        self
    }

    pub fn on_head(&self, url: &str, effective_url: &str, headers: &[(&str, &str)]) -> &Self {
        let response = HttpResponse {
            effective_url: effective_url.to_string(),
            status: 200,
            body: String::new(),
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
                .collect(),
        };
        self.heads.lock().unwrap().insert(url.to_string(), Ok(response));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self, method: Method) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .map(|call| call.url)
            .collect()
    }

    fn answer(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<HttpResponse, HttpError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            url: url.to_string(),
            headers: headers.clone(),
            follow_redirects,
        });

        let table = match method {
            Method::Get => &self.gets,
            Method::Head => &self.heads,
        };
        table
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(HttpError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<HttpResponse, HttpError> {
        self.answer(Method::Get, url, headers, follow_redirects)
    }

    async fn head(
        &self,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<HttpResponse, HttpError> {
        self.answer(Method::Head, url, headers, follow_redirects)
    }
}
