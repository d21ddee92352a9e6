//! This module provides the retrying HTTP(S) fetcher, everything is based on async
//! reqwest with tokio.

use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::{header, Client, ClientBuilder, StatusCode};


/// The user agent sent on every request.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
/// Informational header describing the client, distinct from the user agent so that
/// servers can tell apart the library from whatever embeds it.
pub const X_CLIENT_INFO: &str = concat!("tritium-runtime/", env!("CARGO_PKG_VERSION"));

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Get a new client builder for async HTTP(S) requests, with the default headers applied.
pub fn builder() -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers({
            let mut headers = header::HeaderMap::new();
            headers.insert("X-Client-Info", header::HeaderValue::from_static(X_CLIENT_INFO));
            headers
        })
}

/// Return the process-wide singleton HTTP client.
pub fn client() -> reqwest::Result<Client> {
    static INSTANCE: OnceCell<Client> = OnceCell::new();
    let inst = INSTANCE.get_or_try_init(builder().build());
    inst.cloned()
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("network error fetching {url}: {source}")]
    Network { url: String, #[source] source: reqwest::Error },
    #[error("non-success status {status} fetching {url}")]
    Status { url: String, status: u16 },
    #[error("timeout fetching {url}")]
    Timeout { url: String },
    #[error("size mismatch fetching {url}: expected {expected}, got {actual}")]
    SizeMismatch { url: String, expected: u32, actual: u32 },
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS
}

fn backoff_delay(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(8)).min(BACKOFF_CAP_MS);
    Duration::from_millis(ms)
}

/// Fetch the full body of `url` as bytes, with up to [`MAX_RETRIES`] retries using
/// exponential backoff capped at 5,000ms. Retries on connection errors, 5xx, 408 and 429.
/// A successful result means the full body was received; a failure leaves no partial
/// state since nothing is written to disk by this function.
pub async fn get_bytes(client: &Client, url: &str, timeout: Duration, expected_size: Option<u32>) -> Result<Vec<u8>, Error> {
    let mut attempt = 0u32;
    loop {
        let res = client.get(url).timeout(timeout).send().await;

        let retry_after = match &res {
            Ok(resp) if resp.status().is_success() => None,
            Ok(resp) if is_retryable_status(resp.status()) => Some(()),
            Ok(_) => None,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => Some(()),
            Err(_) => None,
        };

        if retry_after.is_some() && attempt < MAX_RETRIES {
            attempt += 1;
            tokio::time::sleep(backoff_delay(attempt)).await;
            continue;
        }

        return match res {
            Ok(resp) if resp.status().is_success() => {
                let status = resp.status();
                let bytes = resp.bytes().await.map_err(|source| {
                    if source.is_timeout() {
                        Error::Timeout { url: url.to_string() }
                    } else {
                        Error::Network { url: url.to_string(), source }
                    }
                })?;
                let _ = status;
                if let Some(expected) = expected_size {
                    let actual = bytes.len() as u32;
                    if actual != expected {
                        return Err(Error::SizeMismatch { url: url.to_string(), expected, actual });
                    }
                }
                Ok(bytes.to_vec())
            }
            Ok(resp) => Err(Error::Status { url: url.to_string(), status: resp.status().as_u16() }),
            Err(e) if e.is_timeout() => Err(Error::Timeout { url: url.to_string() }),
            Err(e) => Err(Error::Network { url: url.to_string(), source: e }),
        };
    }
}

/// Fetch `url` as a UTF-8 string, returning `Ok(None)` on a 404 rather than an error.
/// Used for checksum sidecar files (`.sha1`, `.sha256`, `.sha512`) that may not exist
/// for every artifact.
pub async fn try_get_text(client: &Client, url: &str, timeout: Duration) -> Result<Option<String>, Error> {
    let res = client.get(url).timeout(timeout).send().await.map_err(|e| {
        if e.is_timeout() {
            Error::Timeout { url: url.to_string() }
        } else {
            Error::Network { url: url.to_string(), source: e }
        }
    })?;

    if res.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !res.status().is_success() {
        return Err(Error::Status { url: url.to_string(), status: res.status().as_u16() });
    }

    let text = res.text().await.map_err(|source| Error::Network { url: url.to_string(), source })?;
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_bytes_succeeds_and_checks_size() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/ok")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let client = client().unwrap();
        let url = format!("{}/ok", server.url());
        let bytes = get_bytes(&client, &url, Duration::from_secs(5), Some(5)).await.unwrap();
        assert_eq!(bytes, b"hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_bytes_rejects_size_mismatch() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/bad-size")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let client = client().unwrap();
        let url = format!("{}/bad-size", server.url());
        let err = get_bytes(&client, &url, Duration::from_secs(5), Some(4)).await.unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
    }

    #[tokio::test]
    async fn get_bytes_retries_on_5xx_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let fail_mock = server.mock("GET", "/flaky")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok_mock = server.mock("GET", "/flaky")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let client = client().unwrap();
        let url = format!("{}/flaky", server.url());
        let bytes = get_bytes(&client, &url, Duration::from_secs(5), None).await.unwrap();
        assert_eq!(bytes, b"ok");
        fail_mock.assert_async().await;
        ok_mock.assert_async().await;
    }

    #[tokio::test]
    async fn try_get_text_returns_none_on_404() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/missing.sha1").with_status(404).create_async().await;

        let client = client().unwrap();
        let url = format!("{}/missing.sha1", server.url());
        assert_eq!(try_get_text(&client, &url, Duration::from_secs(5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn try_get_text_returns_body_on_success() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/present.sha1").with_status(200).with_body("abc123").create_async().await;

        let client = client().unwrap();
        let url = format!("{}/present.sha1", server.url());
        assert_eq!(try_get_text(&client, &url, Duration::from_secs(5)).await.unwrap(), Some("abc123".to_string()));
    }
}
