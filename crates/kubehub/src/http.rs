//! Raw HTTP watch connection against the platform's REST endpoint.

use futures::StreamExt;
use reqwest::StatusCode;

use crate::watch::{ByteStream, Connector, WatchError};

/// Connects to `<base><path>?watch=true` with a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    url: String,
}

impl HttpConnector {
    pub fn new(http: reqwest::Client, base: &str, path: &str) -> Self {
        Self { http, url: watch_url(base, path) }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn watch_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}watch=true", base, path, sep)
}

#[async_trait::async_trait]
impl Connector for HttpConnector {
    async fn connect(&self) -> Result<ByteStream, WatchError> {
        let resp = self.http.get(&self.url).send().await.map_err(|e| WatchError::Connect(e.to_string()))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(WatchError::Status(status.as_u16()));
        }
        Ok(resp.bytes_stream().map(|r| r.map_err(|e| WatchError::Read(e.to_string()))).boxed())
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_url_joins_base_and_path() {
        assert_eq!(
            watch_url("http://127.0.0.1:8001/", "/apis/ibawt.ca/v1/namespaces/default/elasticsearchs"),
            "http://127.0.0.1:8001/apis/ibawt.ca/v1/namespaces/default/elasticsearchs?watch=true"
        );
        assert_eq!(watch_url("http://h", "apis/x"), "http://h/apis/x?watch=true");
        assert_eq!(watch_url("http://h", "/apis/x?labelSelector=a"), "http://h/apis/x?labelSelector=a&watch=true");
    }
}
