//! fetch 类 Transport 抽象
//!
//! 连接控制器只通过 [`Transport`] 发起请求：给定 URL 与 [`RequestInit`]，
//! 返回一个解析为 [`TransportResponse`] 的 future。

#[cfg(feature = "client")]
mod reqwest_transport;

#[cfg(feature = "client")]
pub use reqwest_transport::ReqwestTransport;

use crate::adapter::ResponseBody;
use crate::error::TransportError;
use crate::options::{RedirectPolicy, ReferrerPolicy, RequestCredentials, RequestMode};
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Transport 返回的 future
pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'static>>;

/// 请求缓存策略；EventSource 总是禁用缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    NoStore,
}

/// 一次请求的全部参数
#[derive(Debug, Clone)]
pub struct RequestInit {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: Option<RequestMode>,
    pub credentials: Option<RequestCredentials>,
    pub redirect: Option<RedirectPolicy>,
    pub referrer: Option<String>,
    pub referrer_policy: Option<ReferrerPolicy>,
    pub cache: CacheMode,
    /// 取消令牌：被触发后 transport 应以 [`TransportError::Aborted`] 结束
    pub signal: CancellationToken,
}

/// fetch 响应中客户端关心的部分
pub struct TransportResponse {
    /// 响应体；None 表示没有响应体
    pub body: Option<ResponseBody>,
    /// 最终 URL（跟随重定向之后）
    pub url: Url,
    pub status: u16,
    /// 请求是否经过了重定向
    pub redirected: bool,
}

impl TransportResponse {
    pub fn new(url: Url, status: u16, body: Option<ResponseBody>) -> Self {
        Self {
            body,
            url,
            status,
            redirected: false,
        }
    }

    /// 标记为经过重定向，`url` 为最终地址
    pub fn redirected_to(mut self, url: Url) -> Self {
        self.url = url;
        self.redirected = true;
        self
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("url", &self.url.as_str())
            .field("status", &self.status)
            .field("redirected", &self.redirected)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// fetch 类函数
pub trait Transport: Send + Sync {
    fn fetch(&self, url: &Url, init: RequestInit) -> TransportFuture;
}

/// 共享的 transport
pub type SharedTransport = Arc<dyn Transport>;

/// 闭包也可以作为 transport 使用
impl<F, Fut> Transport for F
where
    F: Fn(Url, RequestInit) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TransportResponse, TransportError>> + Send + 'static,
{
    fn fetch(&self, url: &Url, init: RequestInit) -> TransportFuture {
        Box::pin((self)(url.clone(), init))
    }
}

/// 从环境中解析默认 transport（只在构造客户端时调用一次）
pub(crate) fn default_transport() -> Option<SharedTransport> {
    #[cfg(feature = "client")]
    {
        Some(Arc::new(ReqwestTransport::new()))
    }

    #[cfg(not(feature = "client"))]
    {
        None
    }
}
