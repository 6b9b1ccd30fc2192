use std::path::{Path, PathBuf};
use std::time::Duration;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, ORIGIN, REFERER};
use reqwest::{Client, ClientBuilder, Proxy, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::utils::create_unique_file;

/// Chunk size used when writing media streams to disk.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Web origin the media CDN expects in `Referer`/`Origin`.
pub const PROVIDER_ORIGIN: &str = "https://vk.com";

/// Shared HTTP client carrying the mobile-client impersonation headers.
///
/// API calls and media downloads go through the same connection pool; API
/// calls get a per-request timeout, streams only a connect timeout so long
/// tracks are not cut off.
pub struct HttpPool {
    client: Client,
    timeout: Duration,
}

impl HttpPool {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(15))
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true);

        if let Some(proxy_url) = &config.proxy {
            log::info!("[HTTP] Using proxy: {}", proxy_url);
            builder = builder.proxy(Proxy::all(proxy_url)?);
        } else if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    /// Headers sent with every API method call.
    pub fn api_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers
    }

    /// API headers plus the `Referer`/`Origin` pair the media CDN requires.
    pub fn media_headers(&self) -> HeaderMap {
        let mut headers = self.api_headers();
        headers.insert(ACCEPT, HeaderValue::from_static("audio/mpeg,audio/*,*/*;q=0.9"));
        headers.insert(REFERER, HeaderValue::from_static("https://vk.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static(PROVIDER_ORIGIN));
        headers
    }

    /// Streams `url` into `path`, returning the number of bytes written.
    ///
    /// Anything but `200 OK` is a failure and leaves no file behind. A stream
    /// that breaks midway removes its partial file on a best-effort basis.
    pub async fn stream_to_file(&self, url: &str, path: &Path) -> Result<u64> {
        let response = self.fetch_media(url).await?;
        let file = tokio::fs::File::create(path).await?;
        Self::finish_stream(response, file, path).await
    }

    /// Like [`stream_to_file`](Self::stream_to_file), but never replaces an
    /// existing file: the name is claimed with `create_new` after the status
    /// check, falling back to `<stem> (n).<ext>`. Returns the path written.
    pub async fn stream_to_new_file(&self, url: &str, path: &Path) -> Result<(PathBuf, u64)> {
        let response = self.fetch_media(url).await?;
        let (file, path) = create_unique_file(path).await?;
        let written = Self::finish_stream(response, file, &path).await?;
        Ok((path, written))
    }

    async fn fetch_media(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .headers(self.media_headers())
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("Download failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(AppError::Transport(format!(
                "HTTP error: {}",
                response.status().as_u16()
            )));
        }
        Ok(response)
    }

    async fn finish_stream(response: reqwest::Response, file: File, path: &Path) -> Result<u64> {
        let result = Self::write_stream(response, file).await;
        if let Err(e) = &result {
            log::warn!("[HTTP] Stream to {:?} failed: {}", path, e);
            if let Err(cleanup) = tokio::fs::remove_file(path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[HTTP] Could not remove partial file {:?}: {}", path, cleanup);
                }
            }
        }
        result
    }

    async fn write_stream(response: reqwest::Response, file: File) -> Result<u64> {
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Transport(format!("Download failed: {}", e)))?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        Ok(written)
    }
}
