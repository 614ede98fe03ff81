//! REST client for a hosted remote authority.
//!
//! Layout: `GET/PUT/DELETE {base}/v1/users/{owner}/watchlist[/{itemId}]`,
//! authenticated with a bearer token. The live feed is implemented by
//! polling and only fires when the fetched set differs from the last one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::{RemoteChangeHandler, RemoteErrorHandler, RemoteStore};
use crate::broadcast::Subscription;
use crate::config::RemoteConfig;
use crate::models::RemoteRecord;
use crate::util::compact_text;
use crate::{Error, Result};

/// Remote authority reached over HTTP.
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|error| Error::InvalidInput(format!("invalid remote URL: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "remote URL cannot be used as a base: {}",
                config.base_url
            )));
        }

        Ok(Self {
            base_url,
            token: config.token.clone(),
            client: reqwest::Client::builder().timeout(request_timeout).build()?,
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(10));
        self
    }

    fn endpoint(&self, owner_id: &str, item_id: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                Error::InvalidInput(format!("remote URL cannot be a base: {}", self.base_url))
            })?;
            segments
                .pop_if_empty()
                .extend(["v1", "users", owner_id, "watchlist"]);
            if let Some(item_id) = item_id {
                segments.push(item_id);
            }
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<RemoteRecord>> {
        let url = self.endpoint(owner_id, None)?;
        let response = self.request(reqwest::Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = ensure_success(response).await?;
        Ok(response.json::<Vec<RemoteRecord>>().await?)
    }

    async fn subscribe(
        &self,
        owner_id: &str,
        on_change: RemoteChangeHandler,
        on_error: RemoteErrorHandler,
    ) -> Result<Subscription> {
        let client = self.clone();
        let owner_id = owner_id.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_seen: Option<Vec<RemoteRecord>> = None;

            loop {
                ticker.tick().await;
                match client.fetch_all(&owner_id).await {
                    Ok(records) if last_seen.as_ref() == Some(&records) => {}
                    Ok(records) => {
                        last_seen = Some(records.clone());
                        on_change(records);
                    }
                    Err(error) => {
                        tracing::debug!("Polling remote watchlist for {owner_id} failed: {error}");
                        on_error(error);
                    }
                }
            }
        });

        Ok(Subscription::from_task(task))
    }

    async fn put(&self, owner_id: &str, record: &RemoteRecord) -> Result<()> {
        let url = self.endpoint(owner_id, Some(&record.item_id))?;
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(record)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete(&self, owner_id: &str, item_id: &str) -> Result<()> {
        let url = self.endpoint(owner_id, Some(item_id))?;
        let response = self.request(reqwest::Method::DELETE, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Remote(parse_api_error(status, &body)))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::{mpsc, oneshot};

    /// Serve one canned response and hand back the raw request.
    async fn spawn_one_shot_server(
        status_line: &str,
        body: &str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("local address");
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len(),
        );
        let (request_tx, request_rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let _ = request_tx.send(request);
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{address}/api"), request_rx)
    }

    /// Read headers plus a `content-length` body.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let read = socket.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..read]);

            let text = String::from_utf8_lossy(&raw).into_owned();
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + content_length {
                break;
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn client(base_url: &str) -> HttpRemoteStore {
        let config = RemoteConfig::new(base_url).unwrap().with_token("secret-token");
        HttpRemoteStore::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn record() -> RemoteRecord {
        RemoteRecord {
            item_id: "m1".to_string(),
            title: "Alien".to_string(),
            image_ref: "alien.jpg".to_string(),
            added_at: Some(10),
            watched: true,
            notes: None,
            vector_clock: [("dev-a", 2)].into_iter().collect(),
            last_modified: Some(20),
            deleted: false,
        }
    }

    #[test]
    fn endpoint_escapes_path_segments() {
        let client = client("https://api.example.com/base/");
        assert_eq!(
            client.endpoint("user 1", Some("m/1")).unwrap().as_str(),
            "https://api.example.com/base/v1/users/user%201/watchlist/m%2F1"
        );
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::FORBIDDEN, r#"{"message":"not your list"}"#),
            "not your list (403)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, "plain failure"),
            "plain failure (400)"
        );
    }

    #[tokio::test]
    async fn fetch_all_parses_records_and_sends_bearer_token() {
        let body = serde_json::to_string(&vec![record()]).unwrap();
        let (base_url, request) = spawn_one_shot_server("200 OK", &body).await;

        let records = client(&base_url).fetch_all("user-1").await.unwrap();
        assert_eq!(records, vec![record()]);

        let request = request.await.unwrap();
        assert!(request.starts_with("GET /api/v1/users/user-1/watchlist HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret-token"));
    }

    #[tokio::test]
    async fn put_sends_camel_case_record() {
        let (base_url, request) = spawn_one_shot_server("204 No Content", "").await;

        client(&base_url).put("user-1", &record()).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("PUT /api/v1/users/user-1/watchlist/m1 HTTP/1.1"));
        assert!(request.contains(r#""itemId":"m1""#));
    }

    #[tokio::test]
    async fn delete_treats_missing_record_as_done() {
        let (base_url, _request) = spawn_one_shot_server("404 Not Found", "").await;
        client(&base_url).delete("user-1", "m1").await.unwrap();
    }

    #[tokio::test]
    async fn rejected_request_is_a_remote_error() {
        let (base_url, _request) =
            spawn_one_shot_server("401 Unauthorized", r#"{"error":"token expired"}"#).await;

        let error = client(&base_url).put("user-1", &record()).await.unwrap_err();
        assert!(error.is_remote());
        assert!(error.to_string().contains("token expired (401)"));
    }

    #[tokio::test]
    async fn unreachable_authority_is_a_remote_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let error = client(&format!("http://{address}"))
            .fetch_all("user-1")
            .await
            .unwrap_err();
        assert!(error.is_remote());
    }

    #[tokio::test]
    async fn polling_subscription_emits_fetched_set() {
        let body = serde_json::to_string(&vec![record()]).unwrap();
        let (base_url, _request) = spawn_one_shot_server("200 OK", &body).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = client(&base_url)
            .with_poll_interval(Duration::from_millis(50))
            .subscribe(
                "user-1",
                Arc::new(move |records| {
                    let _ = tx.send(records);
                }),
                Arc::new(|_| {}),
            )
            .await
            .unwrap();

        let records = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records, vec![record()]);
        subscription.unsubscribe();
    }
}
