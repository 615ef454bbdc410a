//! sse-eventsource 统一错误类型

use std::io;
use thiserror::Error;
use url::Url;

/// 构造客户端时的配置错误（同步返回，客户端不会被创建）
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("没有可用的 transport：启用 `client` 特性，或通过 `EventSourceOptions::transport` 提供")]
    NoTransport,

    #[error("没有可用的 tokio 运行时：EventSource 必须在运行时内创建")]
    NoRuntime,

    #[error("无效的 URL: {0}")]
    InvalidUrl(String),

    #[error("无效的 initial_last_event_id: {0}")]
    InvalidLastEventId(String),

    #[error("无效的请求头: {0}")]
    InvalidHeader(String),
}

/// Transport（fetch 类函数）返回的错误
#[derive(Debug, Error)]
pub enum TransportError {
    /// 请求被取消令牌中止
    #[error("请求已中止")]
    Aborted,

    #[cfg(feature = "client")]
    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("重定向策略拒绝了到 {0} 的重定向")]
    RedirectRejected(Url),

    #[error("无效的请求头: {0}")]
    InvalidHeader(String),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// 读取响应体时的错误
#[derive(Debug, Error)]
pub enum StreamError {
    /// 源被提前关闭或被取消，归一化为中止类错误
    #[error("操作已中止")]
    Aborted {
        #[source]
        cause: Option<io::Error>,
    },

    #[error("读取响应体时的 I/O 错误: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    pub fn aborted() -> Self {
        Self::Aborted { cause: None }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// 单次连接尝试的失败分类
#[derive(Debug, Error)]
pub enum SseError {
    #[error("Transport 错误: {0}")]
    Transport(#[from] TransportError),

    #[error("响应缺少响应体")]
    MissingBody,

    #[error("流错误: {0}")]
    Stream(#[from] StreamError),

    #[error("EventSource 不支持同步迭代，请使用 `messages()` 异步迭代")]
    SyncIteration,
}

impl SseError {
    /// 是否为中止类错误（只看错误类型，不看消息文本）
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_abort(),
            Self::Stream(e) => e.is_abort(),
            Self::MissingBody | Self::SyncIteration => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ConfigError::InvalidUrl("\"x\"".into()).to_string(),
            "无效的 URL: \"x\""
        );
        assert_eq!(SseError::MissingBody.to_string(), "响应缺少响应体");
        assert_eq!(
            SseError::from(TransportError::Aborted).to_string(),
            "Transport 错误: 请求已中止"
        );
    }

    #[test]
    fn abort_is_detected_by_kind() {
        assert!(SseError::from(TransportError::Aborted).is_abort());
        assert!(SseError::from(StreamError::aborted()).is_abort());
        assert!(!SseError::MissingBody.is_abort());

        // 消息里带 "abort" 的普通 I/O 错误不算中止
        let io = io::Error::new(io::ErrorKind::Other, "aborted by peer");
        assert!(!SseError::from(StreamError::Io(io)).is_abort());
    }
}
