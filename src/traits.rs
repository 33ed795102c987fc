use crate::client::{Payload, Transfer};
use crate::error::Result;
use crate::types::Endpoint;
use async_trait::async_trait;
use std::net::IpAddr;

/// NetworkClient: 探测引擎所依赖的网络能力
///
/// The engine never opens sockets itself; everything goes through this seam so
/// the resolver and executor can be driven by a scripted client in tests.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Plain GET from the default route. Returns the status code.
    async fn check(&self, url: &str) -> Result<u16>;

    /// Fetch a text document (used for the remote target list).
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// A client whose connections all leave from `source`. Built once per
    /// probe and shared by its upload and download.
    fn bind(&self, source: IpAddr) -> Result<Box<dyn BoundClient + '_>>;
}

/// BoundClient: 绑定到单个源地址的请求
#[async_trait]
pub trait BoundClient: Send + Sync {
    /// POST `payload` to `url`.
    async fn upload(&self, url: &str, payload: Payload) -> Result<Transfer>;

    /// GET `url`, reading at most `limit` bytes.
    async fn download(&self, url: &str, limit: u64) -> Result<Transfer>;
}

/// ResultSink: 已接受端点的持久化输出
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Append one accepted endpoint. Must be durable before returning.
    async fn record(&self, endpoint: Endpoint) -> Result<()>;
}
