//! Native HTTP transport using reqwest

use super::{Headers, HttpError, HttpResponse, Transport};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response};
use std::collections::HashMap;
use std::time::Duration;

/// Settings for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    /// Applied to every call; there is no automatic retry
    pub connect_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("pidgate/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(60),
            max_redirects: 10,
        }
    }
}

pub struct HttpClient {
    following: Client,
    direct: Client,
}

impl HttpClient {
    pub fn new(config: &TransportConfig) -> Result<Self, HttpError> {
        let build = |policy: Policy| {
            Client::builder()
                .user_agent(config.user_agent.as_str())
                .connect_timeout(config.connect_timeout)
                .redirect(policy)
                .build()
                .map_err(|e| HttpError::RequestFailed {
                    message: e.to_string(),
                })
        };

        Ok(Self {
            following: build(Policy::limited(config.max_redirects))?,
            direct: build(Policy::none())?,
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<Response, HttpError> {
        let client = if follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| HttpError::InvalidHeader {
                    name: name.clone(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| HttpError::InvalidHeader {
                    name: name.clone(),
                })?;
            header_map.insert(header_name, header_value);
        }

        let response = client
            .request(method, url)
            .headers(header_map)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout
                } else if e.is_builder() {
                    HttpError::InvalidUrl {
                        url: url.to_string(),
                    }
                } else {
                    HttpError::RequestFailed {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

fn collect_headers(response: &Response) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in response.headers() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(
        &self,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<HttpResponse, HttpError> {
        let response = self
            .send(Method::GET, url, headers, follow_redirects)
            .await?;

        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let response_headers = collect_headers(&response);

        let body = response.text().await.map_err(|e| HttpError::RequestFailed {
            message: e.to_string(),
        })?;

        tracing::debug!("GET {} -> {} ({})", url, effective_url, status);
        Ok(HttpResponse {
            effective_url,
            status,
            body,
            headers: response_headers,
        })
    }

    async fn head(
        &self,
        url: &str,
        headers: &Headers,
        follow_redirects: bool,
    ) -> Result<HttpResponse, HttpError> {
        let response = self
            .send(Method::HEAD, url, headers, follow_redirects)
            .await?;

        tracing::debug!("HEAD {} -> {}", url, response.url());
        Ok(HttpResponse {
            effective_url: response.url().to_string(),
            status: response.status().as_u16(),
            body: String::new(),
            headers: collect_headers(&response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert!(HttpClient::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected() {
        let client = HttpClient::new(&TransportConfig::default()).unwrap();
        let mut headers = Headers::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = client
            .get("http://127.0.0.1:9/", &headers, false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HttpError::InvalidHeader {
                name: "bad header".to_string()
            }
        );
    }
}
