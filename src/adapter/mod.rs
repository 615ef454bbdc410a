//! 响应体适配层
//!
//! 不同 transport 交出的响应体有两种形态：
//! - 拉取式字节流（`Stream<Item = Result<Bytes, StreamError>>`），原样使用
//! - 推送式源（data/end/error 事件 + pause/resume/destroy 控制），
//!   包装成带背压的拉取式流
//!
//! 连接控制器只面对 [`adapt`] 返回的 [`ByteStream`]。

mod push;
mod reader;

pub use push::{PushListener, PushSource, PushStream, HIGH_WATER_MARK};
pub use reader::ReaderSource;

use crate::error::StreamError;
use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;

/// 规范的拉取式字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// transport 交出的响应体
pub enum ResponseBody {
    /// 已经是拉取式字节流
    Pull(ByteStream),
    /// 推送式源
    Push(Box<dyn PushSource>),
}

impl ResponseBody {
    pub fn pull<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
    {
        Self::Pull(Box::pin(stream))
    }

    pub fn push(source: impl PushSource + 'static) -> Self {
        Self::Push(Box::new(source))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Pull(_) => "pull",
            Self::Push(_) => "push",
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResponseBody").field(&self.kind()).finish()
    }
}

/// 将响应体归一化为拉取式字节流
pub fn adapt(body: ResponseBody) -> ByteStream {
    match body {
        ResponseBody::Pull(stream) => stream,
        ResponseBody::Push(source) => Box::pin(PushStream::new(source)),
    }
}
