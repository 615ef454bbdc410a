//! 基于 reqwest 的默认 Transport

use super::{CacheMode, RequestInit, Transport, TransportFuture, TransportResponse};
use crate::adapter::ResponseBody;
use crate::error::{StreamError, TransportError};
use crate::options::{RedirectPolicy, ReferrerPolicy};
use futures_util::StreamExt;
use http::header::{HeaderValue, ACCEPT_ENCODING, CACHE_CONTROL, LOCATION, PRAGMA, REFERER};
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// reqwest transport
///
/// - 默认跟随重定向；`RedirectPolicy::Error`/`Manual` 使用不跟随重定向的 client
/// - 默认发送 `Accept-Encoding: identity`，避免压缩带来的缓冲影响流式体验
/// - `mode`/`credentials` 是浏览器概念，这里忽略
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    connect_timeout: Option<Duration>,
    accept_identity_encoding: bool,
    follow: OnceLock<reqwest::Client>,
    no_redirect: OnceLock<reqwest::Client>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            accept_identity_encoding: true,
            follow: OnceLock::new(),
            no_redirect: OnceLock::new(),
        }
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用已有的 client 处理跟随重定向的请求
    pub fn with_client(client: reqwest::Client) -> Self {
        let inner = Inner::default();
        let _ = inner.follow.set(client);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 设置连接超时（只限制建立连接，不限制长连接的读取）
    pub fn connect_timeout(self, timeout: Duration) -> Self {
        self.reconfigure(|inner| inner.connect_timeout = Some(timeout))
    }

    /// 是否发送 `Accept-Encoding: identity`
    pub fn accept_identity_encoding(self, enabled: bool) -> Self {
        self.reconfigure(|inner| inner.accept_identity_encoding = enabled)
    }

    fn reconfigure(self, f: impl FnOnce(&mut Inner)) -> Self {
        let mut inner = Inner {
            connect_timeout: self.inner.connect_timeout,
            accept_identity_encoding: self.inner.accept_identity_encoding,
            follow: OnceLock::new(),
            no_redirect: OnceLock::new(),
        };
        if let Some(client) = self.inner.follow.get() {
            let _ = inner.follow.set(client.clone());
        }
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    fn client(&self, follow_redirects: bool) -> Result<reqwest::Client, TransportError> {
        let cell = if follow_redirects {
            &self.inner.follow
        } else {
            &self.inner.no_redirect
        };
        if let Some(client) = cell.get() {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder();
        if !follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }
        if let Some(timeout) = self.inner.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;
        Ok(cell.get_or_init(|| client).clone())
    }
}

impl Transport for ReqwestTransport {
    fn fetch(&self, url: &Url, init: RequestInit) -> TransportFuture {
        let this = self.clone();
        let url = url.clone();

        Box::pin(async move {
            let redirect = init.redirect.unwrap_or(RedirectPolicy::Follow);
            let client = this.client(redirect == RedirectPolicy::Follow)?;

            let mut headers = init.headers;
            if this.inner.accept_identity_encoding && !headers.contains_key(ACCEPT_ENCODING) {
                headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
            }
            if init.cache == CacheMode::NoStore {
                if !headers.contains_key(CACHE_CONTROL) {
                    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                }
                if !headers.contains_key(PRAGMA) {
                    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
                }
            }
            if let Some(referrer) = init.referrer.as_deref() {
                let suppressed = init.referrer_policy == Some(ReferrerPolicy::NoReferrer);
                if !suppressed && !referrer.is_empty() && referrer != "about:client" {
                    let value = HeaderValue::from_str(referrer)
                        .map_err(|_| TransportError::InvalidHeader("Referer 不是合法的请求头值".to_string()))?;
                    headers.insert(REFERER, value);
                }
            }

            let mut rb = client.request(init.method.clone(), url.clone()).headers(headers);
            if let Some(body) = init.body {
                rb = rb.body(body);
            }

            debug!(url = %url, method = %init.method, redirect = ?redirect, "Sending SSE request");

            let resp = tokio::select! {
                biased;
                _ = init.signal.cancelled() => return Err(TransportError::Aborted),
                resp = rb.send() => resp.map_err(|e| {
                    if e.is_timeout() {
                        warn!(url = %url, "Connection timeout");
                    }
                    TransportError::Http(e)
                })?,
            };

            let status = resp.status();
            if redirect == RedirectPolicy::Error && status.is_redirection() {
                let target = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| url.join(loc).ok())
                    .unwrap_or_else(|| url.clone());
                return Err(TransportError::RedirectRejected(target));
            }

            let final_url = resp.url().clone();
            let body = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| StreamError::Io(io::Error::new(io::ErrorKind::Other, e))));

            let response = TransportResponse::new(
                url.clone(),
                status.as_u16(),
                Some(ResponseBody::pull(body)),
            );
            Ok(if final_url != url {
                response.redirected_to(final_url)
            } else {
                response
            })
        })
    }
}
