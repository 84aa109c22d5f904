use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;

use super::remote::{RemoteError, RemoteStore};

/// Initial backoff delay on stream failure
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Maximum backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(300);
/// Coalesce bursts of change events into one refetch
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Client for a path-addressable JSON document store over HTTP.
///
/// `PUT {base}/{path}.json` is a full overwrite, `DELETE` removes the
/// node, and change streaming uses server-sent events on the collection
/// URL. A change event triggers a debounced full-collection refetch, so
/// subscribers always see whole snapshots regardless of what the event
/// itself carried.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: String, auth_token: Option<String>) -> Result<Self, RemoteError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::Network(
                "base URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// Build the full URL for a path
    fn url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match &self.auth_token {
            Some(token) => format!("{}/{}.json?auth={}", self.base_url, path, token),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }

    fn check(path: &str, status: StatusCode) -> Result<(), RemoteError> {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RemoteError::Denied(path.to_string()))
            }
            status if !status.is_success() => Err(RemoteError::Server {
                status: status.as_u16(),
                message: String::new(),
            }),
            _ => Ok(()),
        }
    }

    /// Fetch the current value at a path.
    pub async fn get(&self, path: &str) -> Result<Value, RemoteError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Self::check(path, response.status())?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(self.url(path))
            .json(&value)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Self::check(path, response.status())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Self::check(path, response.status())
    }

    fn subscribe(&self, collection_path: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(8);
        let remote = self.clone();
        let collection = collection_path.to_string();
        tokio::spawn(async move {
            snapshot_loop(remote, collection, tx).await;
        });
        rx
    }
}

/// Long-lived snapshot listener for one collection.
///
/// Reconnects with exponential backoff, resetting after a successful
/// connection. Exits when the subscriber drops its receiver.
async fn snapshot_loop(remote: HttpRemote, collection: String, tx: mpsc::Sender<Value>) {
    use reqwest_eventsource::{Event, EventSource};

    let stream_url = remote.url(&collection);
    let mut backoff = INITIAL_BACKOFF;
    let mut last_refetch = Instant::now()
        .checked_sub(DEBOUNCE_WINDOW)
        .unwrap_or_else(Instant::now);

    log::info!("snapshot stream {}: starting listener", collection);

    // Deliver current state before the stream settles, like a
    // subscription callback firing immediately.
    if deliver_snapshot(&remote, &collection, &tx).await.is_err() {
        return;
    }

    loop {
        let request = remote
            .client
            .get(&stream_url)
            .header("Accept", "text/event-stream");

        let mut es = match EventSource::new(request) {
            Ok(es) => es,
            Err(e) => {
                log::error!("snapshot stream {}: failed to open: {}", collection, e);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                if tx.is_closed() {
                    return;
                }
                continue;
            }
        };

        let mut connection_opened = false;

        loop {
            match es.next().await {
                Some(Ok(Event::Open)) => {
                    log::debug!("snapshot stream {}: connected", collection);
                    connection_opened = true;
                    backoff = INITIAL_BACKOFF;
                }
                Some(Ok(Event::Message(msg))) => {
                    if msg.event == "keep-alive" {
                        continue;
                    }
                    // Whatever changed, subscribers want the whole
                    // collection. Debounce bursts, then refetch.
                    let now = Instant::now();
                    if now.duration_since(last_refetch) < DEBOUNCE_WINDOW {
                        log::debug!("snapshot stream {}: debouncing event", collection);
                        continue;
                    }
                    last_refetch = now;
                    if deliver_snapshot(&remote, &collection, &tx).await.is_err() {
                        es.close();
                        return;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("snapshot stream {}: {}, reconnecting", collection, e);
                    es.close();
                    break;
                }
                None => {
                    log::info!("snapshot stream {}: ended, reconnecting", collection);
                    break;
                }
            }
            if tx.is_closed() {
                es.close();
                return;
            }
        }

        // Back off before reconnecting (shorter if we had a successful
        // connection).
        let delay = if connection_opened {
            INITIAL_BACKOFF
        } else {
            backoff = (backoff * 2).min(MAX_BACKOFF);
            backoff
        };
        tokio::time::sleep(delay).await;
        if tx.is_closed() {
            return;
        }
    }
}

/// Refetch the collection and hand it to the subscriber. `Err` means the
/// subscriber is gone; a failed fetch stays on the stream and waits for
/// the next event or reconnect.
async fn deliver_snapshot(
    remote: &HttpRemote,
    collection: &str,
    tx: &mpsc::Sender<Value>,
) -> Result<(), ()> {
    match remote.get(collection).await {
        Ok(snapshot) => tx.send(snapshot).await.map_err(|_| ()),
        Err(e) => {
            log::warn!("snapshot stream {}: refetch failed: {}", collection, e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let remote = HttpRemote::new("https://db.example.com/".to_string(), None).unwrap();
        assert_eq!(
            remote.url("milkData/u1/milkRecords/a"),
            "https://db.example.com/milkData/u1/milkRecords/a.json"
        );

        let authed =
            HttpRemote::new("https://db.example.com".to_string(), Some("tok".to_string())).unwrap();
        assert_eq!(
            authed.url("/milkData/u1/notes"),
            "https://db.example.com/milkData/u1/notes.json?auth=tok"
        );
    }

    #[test]
    fn test_rejects_non_http_base() {
        assert!(HttpRemote::new("ftp://db.example.com".to_string(), None).is_err());
    }
}
