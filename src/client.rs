use crate::error::Result;
use crate::traits::{BoundClient, NetworkClient};
use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Synthetic upload body: `size` zero bytes, produced `chunk` bytes at a time.
#[derive(Debug, Clone, Copy)]
pub struct Payload {
    pub size: u64,
    pub chunk: usize,
}

impl Payload {
    pub fn new(size: u64, chunk: usize) -> Self {
        Self {
            size,
            chunk: chunk.max(1),
        }
    }

    /// Sizes of the chunks the body is streamed in. Only one chunk is ever alive at a time.
    pub fn chunk_sizes(&self) -> impl Iterator<Item = usize> + Send + Sync + 'static {
        let step = self.chunk.max(1);
        let size = self.size;
        let chunk = step as u64;
        (0..size)
            .step_by(step)
            .map(move |offset| (size - offset).min(chunk) as usize)
    }

    fn into_body(self) -> Body {
        let chunks = self
            .chunk_sizes()
            .map(|n| Ok::<_, std::io::Error>(vec![0u8; n]));
        Body::wrap_stream(futures::stream::iter(chunks))
    }
}

/// Status plus timed byte count of one request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub status: u16,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// reqwest-backed client for unbound requests (liveness, list fetches).
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl NetworkClient for HttpClient {
    async fn check(&self, url: &str) -> Result<u16> {
        let resp = self.client.get(url).send().await?;
        Ok(resp.status().as_u16())
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }

    fn bind(&self, source: IpAddr) -> Result<Box<dyn BoundClient + '_>> {
        let client = Client::builder()
            .timeout(self.timeout)
            .no_proxy()
            .local_address(source)
            .build()?;
        Ok(Box::new(BoundHttpClient { client }))
    }
}

/// A reqwest client with its own connection pool, so every request really
/// leaves from the bound local address.
pub struct BoundHttpClient {
    client: Client,
}

#[async_trait]
impl BoundClient for BoundHttpClient {
    async fn upload(&self, url: &str, payload: Payload) -> Result<Transfer> {
        let start = Instant::now();

        let resp = self
            .client
            .post(url)
            .header(CONTENT_LENGTH, payload.size)
            .body(payload.into_body())
            .send()
            .await?;
        let status = resp.status().as_u16();
        // 读取响应体, 确保整个请求周期结束后再计时
        resp.bytes().await?;

        Ok(Transfer {
            status,
            bytes: payload.size,
            elapsed: start.elapsed(),
        })
    }

    async fn download(&self, url: &str, limit: u64) -> Result<Transfer> {
        let start = Instant::now();

        let mut resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let mut bytes = 0u64;

        if status == 200 {
            while let Some(chunk) = resp.chunk().await? {
                bytes += chunk.len() as u64;
                if bytes >= limit {
                    break;
                }
            }
        }

        Ok(Transfer {
            status,
            bytes,
            elapsed: start.elapsed(),
        })
    }
}
