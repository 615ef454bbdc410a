//! sse-eventsource: 带自动重连的 EventSource (Server-Sent Events) 客户端
//!
//! 本库提供:
//! - 连接状态机（CONNECTING / OPEN / CLOSED）与自动重连
//! - `Last-Event-ID` 续传、服务端 `retry:` 间隔、HTTP 204 终止
//! - 推送式 / 拉取式响应体的统一适配（带背压）
//! - 回调订阅与多个并发的异步迭代消费者
//!
//! # 功能特性
//!
//! - `client` (默认): 基于 reqwest 的默认 [`Transport`]
//!
//! 不启用 `client` 时必须通过 [`EventSourceOptions::transport`] 提供 transport。
//!
//! # 快速开始
//!
//! ## 回调
//!
//! ```rust,no_run
//! use sse_eventsource::{EventSource, EventSourceOptions};
//!
//! # async fn example() -> Result<(), sse_eventsource::ConfigError> {
//! let es = EventSource::with_options(
//!     EventSourceOptions::new("https://example.com/events")
//!         .on_message(|msg| println!("事件: {:?} {}", msg.event, msg.data))
//!         .on_disconnect(|_| eprintln!("连接断开，稍后重连")),
//! )?;
//! # es.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## 异步迭代
//!
//! ```rust,no_run
//! use sse_eventsource::EventSource;
//! use futures_util::StreamExt;
//!
//! # async fn example() -> Result<(), sse_eventsource::ConfigError> {
//! let es = EventSource::new("https://example.com/events")?;
//! let mut messages = es.messages();
//! while let Some(msg) = messages.next().await {
//!     if msg.event.as_deref() == Some("done") {
//!         es.close();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// 核心模块
mod client;
mod decode;
mod error;
mod event;
mod options;
mod parser;
mod reconnect;

pub mod adapter;
pub mod multicast;
pub mod transport;

pub use client::EventSource;
pub use decode::Utf8Decoder;
pub use error::{ConfigError, SseError, StreamError, TransportError};
pub use event::{Message, ReadyState};
pub use multicast::{MessageStream, SubscriptionId};
pub use options::{
    EventSourceOptions, LifecycleCallback, MessageCallback, ReconnectCallback, ReconnectInfo,
    RedirectPolicy, ReferrerPolicy, RequestCredentials, RequestMode, UrlInput,
    DEFAULT_RECONNECT_DELAY,
};
pub use parser::{MessageParser, ParsedItem, SseParser};
pub use transport::{RequestInit, Transport, TransportResponse};

#[cfg(feature = "client")]
pub use transport::ReqwestTransport;
