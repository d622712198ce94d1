use std::time::{Duration, Instant};

use reqwest::{Client, ClientBuilder, StatusCode};
use tracing::{info, warn};

use crate::app_config::AppConfig;

/// A page snapshot before parsing.
pub struct LoadedPage {
    /// What the user asked for: a URL or a file path.
    pub source: String,
    /// Address the page was served at, when known.
    pub address: Option<String>,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Loads page snapshots from disk or over HTTP.
pub struct PageLoader {
    client: Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl PageLoader {
    pub fn new(config: &AppConfig) -> Result<Self, LoadError> {
        Self::with_builder(Client::builder(), config)
    }

    fn with_builder(builder: ClientBuilder, config: &AppConfig) -> Result<Self, LoadError> {
        let client = builder
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(LoadError::Client)?;
        Ok(Self {
            client,
            max_retries: config.fetch_retries,
            base_backoff: Duration::from_millis(config.fetch_backoff_ms),
        })
    }

    /// `http(s)://` inputs are fetched, anything else is read as a file.
    pub async fn load(&self, input: &str) -> Result<LoadedPage, LoadError> {
        if is_url(input) {
            self.fetch_with_retry(input).await
        } else {
            read_file(input)
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<LoadedPage, LoadError> {
        let mut attempt = 0;
        loop {
            let err = match self.fetch_once(url).await {
                Ok(page) => return Ok(page),
                Err(e) if attempt < self.max_retries && is_transient(&e) => e,
                Err(e) => return Err(e),
            };

            let wait = backoff(self.base_backoff, attempt);
            warn!(
                "Load of {} failed (attempt {}/{}): {}, backing off {:.1}s",
                url,
                attempt + 1,
                self.max_retries,
                err,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<LoadedPage, LoadError> {
        let http = |source| LoadError::Http {
            url: url.to_string(),
            source,
        };

        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                url: url.to_string(),
                status,
            });
        }
        let address = response.url().to_string();
        let html = response.text().await.map_err(http)?;
        info!(
            "Fetched {} ({} bytes, {} ms)",
            address,
            html.len(),
            start.elapsed().as_millis()
        );

        Ok(LoadedPage {
            source: url.to_string(),
            address: Some(address),
            html,
        })
    }
}

fn read_file(path: &str) -> Result<LoadedPage, LoadError> {
    let html = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_string(),
        source,
    })?;
    Ok(LoadedPage {
        source: path.to_string(),
        address: None,
        html,
    })
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Rate limiting, server errors and dropped connections are worth another try.
fn is_transient(err: &LoadError) -> bool {
    match err {
        LoadError::Status { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
        }
        LoadError::Http { source, .. } => source.is_timeout() || source.is_connect(),
        LoadError::Read { .. } | LoadError::Client(_) => false,
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn status(code: u16) -> LoadError {
        LoadError::Status {
            url: "https://civitai.com/images/1".into(),
            status: StatusCode::from_u16(code).unwrap(),
        }
    }

    #[test]
    fn retries_only_transient_statuses() {
        assert!(is_transient(&status(429)));
        assert!(is_transient(&status(502)));
        assert!(is_transient(&status(503)));
        assert!(!is_transient(&status(404)));
        assert!(!is_transient(&status(403)));
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(2000);
        assert_eq!(backoff(base, 0), Duration::from_secs(2));
        assert_eq!(backoff(base, 1), Duration::from_secs(4));
        assert_eq!(backoff(base, 2), Duration::from_secs(8));
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://civitai.com/images/1"));
        assert!(is_url("http://localhost:3000/images/1"));
        assert!(!is_url("pages/images/1.html"));
        assert!(!is_url("/home/me/https.html"));
    }

    fn config(dir: &std::path::Path, fetch_retries: u32) -> AppConfig {
        AppConfig {
            db_path: dir.join("db.sqlite"),
            export_dir: dir.to_path_buf(),
            user_agent: "test".into(),
            fetch_retries,
            fetch_backoff_ms: 0,
        }
    }

    fn local_loader(fetch_retries: u32) -> PageLoader {
        let dir = std::env::temp_dir();
        PageLoader::with_builder(Client::builder().no_proxy(), &config(&dir, fetch_retries)).unwrap()
    }

    /// One-shot HTTP server answering each connection with the next status
    /// in `statuses` (the last one repeats). Returns the page URL and a
    /// counter of requests received.
    async fn serve(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(200);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;

                let body = "<html><body>image</body></html>";
                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    _ => "Service Unavailable",
                };
                let reply = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/images/7", addr), hits)
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() {
        let (url, hits) = serve(vec![503, 200]).await;
        let page = local_loader(3).load(&url).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(page.address.as_deref(), Some(url.as_str()));
        assert!(page.html.contains("image"));
    }

    #[tokio::test]
    async fn retries_stop_at_the_configured_limit() {
        let (url, hits) = serve(vec![503]).await;
        let err = local_loader(1).load(&url).await.err().unwrap();

        assert!(matches!(err, LoadError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = serve(vec![404]).await;
        let err = local_loader(3).load(&url).await.err().unwrap();

        assert!(matches!(err, LoadError::Status { status, .. } if status == StatusCode::NOT_FOUND));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_file_has_no_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("12345.html");
        std::fs::write(&path, "<html><body></body></html>").unwrap();

        let loader = PageLoader::new(&config(dir.path(), 0)).unwrap();
        let page = loader.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(page.address, None);
        assert!(page.html.contains("<body>"));

        let missing = loader.load("does/not/exist.html").await.err().unwrap();
        assert!(matches!(missing, LoadError::Read { .. }));
    }
}
