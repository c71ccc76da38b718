//! Remote table API transport
//!
//! [`TableTransport`] is the seam between the fetch loop and the network:
//! one call in, one raw response (or transport failure) out. Status codes
//! are not interpreted here; classification is the retry policy's job.

use crate::config::TableUrl;
use crate::error::TransportError;
use crate::table::types::{ContinuationToken, PartitionKey};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use std::time::Duration;

/// Default REST API version
pub const DEFAULT_API_VERSION: &str = "2023-01-03";

const NEXT_PARTITION_KEY_HEADER: &str = "x-ms-continuation-NextPartitionKey";
const NEXT_ROW_KEY_HEADER: &str = "x-ms-continuation-NextRowKey";
const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";

/// One list-entities call
#[derive(Debug, Clone)]
pub struct PageRequest<'a> {
    pub key: &'a PartitionKey,
    pub continuation: Option<&'a ContinuationToken>,
    pub bearer_token: &'a str,
    pub timeout: Duration,
}

/// Uninterpreted response from the table endpoint
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub continuation: Option<ContinuationToken>,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues list-entities calls against the table store
pub trait TableTransport: Send + Sync {
    fn list_entities(&self, request: &PageRequest<'_>) -> Result<RawResponse, TransportError>;
}

/// Blocking HTTP transport for the Azure Tables REST API
pub struct HttpTableClient {
    client: Client,
    table_url: TableUrl,
    api_version: String,
}

impl HttpTableClient {
    pub fn new(
        table_url: TableUrl,
        api_version: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("table-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            client,
            table_url,
            api_version: api_version.into(),
        })
    }

    fn query_params(request: &PageRequest<'_>) -> Vec<(&'static str, String)> {
        let mut params = vec![("$filter", request.key.odata_filter())];
        if let Some(token) = request.continuation {
            if let Some(npk) = &token.next_partition_key {
                params.push(("NextPartitionKey", npk.clone()));
            }
            if let Some(nrk) = &token.next_row_key {
                params.push(("NextRowKey", nrk.clone()));
            }
        }
        params
    }
}

impl TableTransport for HttpTableClient {
    fn list_entities(&self, request: &PageRequest<'_>) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(self.table_url.query_endpoint())
            .query(&Self::query_params(request))
            .header(AUTHORIZATION, format!("Bearer {}", request.bearer_token))
            .header("x-ms-version", &self.api_version)
            .header("x-ms-date", rfc1123_now())
            .header(ACCEPT, ACCEPT_NO_METADATA)
            .timeout(request.timeout)
            .send()
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let retry_after = parse_retry_after(headers, Utc::now());
        let continuation = ContinuationToken::from_parts(
            header_string(headers, NEXT_PARTITION_KEY_HEADER),
            header_string(headers, NEXT_ROW_KEY_HEADER),
        );

        let body = response.text().map_err(classify_reqwest_error)?;

        Ok(RawResponse {
            status,
            retry_after,
            continuation,
            body,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// RFC 1123 date for `x-ms-date`
fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse `Retry-After` as delta-seconds or an HTTP date
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            parse_retry_after(&headers, Utc::now()),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 01 May 2024 12:00:30 GMT"),
        );
        assert_eq!(
            parse_retry_after(&headers, now),
            Some(Duration::from_secs(30))
        );

        // Dates in the past mean "retry now"
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 01 May 2024 11:00:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_absent_or_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers, Utc::now()), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, Utc::now()), None);
    }

    #[test]
    fn test_query_params_thread_continuation() {
        let key = PartitionKey::new("it's");
        let token = ContinuationToken {
            next_partition_key: Some("npk".into()),
            next_row_key: Some("nrk".into()),
        };
        let request = PageRequest {
            key: &key,
            continuation: Some(&token),
            bearer_token: "t",
            timeout: Duration::from_secs(1),
        };

        let params = HttpTableClient::query_params(&request);
        assert_eq!(
            params,
            vec![
                ("$filter", "PartitionKey eq 'it''s'".to_string()),
                ("NextPartitionKey", "npk".to_string()),
                ("NextRowKey", "nrk".to_string()),
            ]
        );
    }

    #[test]
    fn test_rfc1123_format() {
        let date = rfc1123_now();
        assert!(date.ends_with(" GMT"));
        assert!(DateTime::parse_from_rfc2822(&date).is_ok());
    }
}
