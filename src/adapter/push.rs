//! 推送式源 -> 拉取式流

use crate::error::StreamError;
use bytes::Bytes;
use futures_core::Stream;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use tracing::debug;

/// 缓冲字节数达到该值后暂停源
pub const HIGH_WATER_MARK: usize = 16 * 1024;

/// 推送式字节源
///
/// 源通过 [`PushListener`] 报告 data/end/error；适配器通过
/// `pause`/`resume` 控制流量，流被取消时调用 `destroy`。
/// 这些方法由适配器在不持有内部锁的情况下调用，源可以在其中同步回调 listener。
pub trait PushSource: Send {
    /// 注册 listener；源应从此刻起通过它投递事件
    fn start(&mut self, listener: PushListener);

    fn pause(&mut self);

    fn resume(&mut self);

    /// 释放底层资源，之后不再投递事件
    fn destroy(&mut self);
}

enum Terminal {
    End,
    Error(StreamError),
}

#[derive(Default)]
struct Shared {
    queue: VecDeque<Bytes>,
    buffered: usize,
    terminal: Option<Terminal>,
    finished: bool,
    waker: Option<Waker>,
}

impl Shared {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// 源向适配器投递事件的句柄
#[derive(Clone)]
pub struct PushListener {
    shared: Arc<Mutex<Shared>>,
}

impl PushListener {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 投递一个分片；返回 false 表示缓冲已满，源应暂停
    pub fn data(&self, chunk: impl Into<Bytes>) -> bool {
        let chunk = chunk.into();
        let mut shared = self.lock();
        // 结束后的事件直接丢弃
        if shared.finished {
            return false;
        }
        if !chunk.is_empty() {
            shared.buffered += chunk.len();
            shared.queue.push_back(chunk);
            shared.wake();
        }
        shared.buffered < HIGH_WATER_MARK
    }

    /// 缓冲是否已达到高水位
    pub fn is_full(&self) -> bool {
        self.lock().buffered >= HIGH_WATER_MARK
    }

    /// 源正常结束
    pub fn end(&self) {
        self.finish(Terminal::End);
    }

    pub fn error(&self, err: io::Error) {
        self.finish(Terminal::Error(StreamError::Io(err)));
    }

    /// 源在结束前被关闭，归一化为中止类错误
    pub fn premature_close(&self, cause: Option<io::Error>) {
        self.finish(Terminal::Error(StreamError::Aborted { cause }));
    }

    fn finish(&self, terminal: Terminal) {
        let mut shared = self.lock();
        if shared.finished {
            return;
        }
        shared.finished = true;
        shared.terminal = Some(terminal);
        shared.wake();
    }
}

/// 包装推送式源的拉取式流
pub struct PushStream {
    source: Box<dyn PushSource>,
    shared: Arc<Mutex<Shared>>,
    paused: bool,
    done: bool,
}

impl PushStream {
    /// 以暂停状态启动源
    pub fn new(mut source: Box<dyn PushSource>) -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        source.pause();
        source.start(PushListener {
            shared: shared.clone(),
        });
        Self {
            source,
            shared,
            paused: true,
            done: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Stream for PushStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let mut shared = this.lock();
        if let Some(chunk) = shared.queue.pop_front() {
            shared.buffered -= chunk.len();
            let over = shared.buffered >= HIGH_WATER_MARK;
            drop(shared);
            if over && !this.paused {
                this.source.pause();
                this.paused = true;
            }
            return Poll::Ready(Some(Ok(chunk)));
        }

        if let Some(terminal) = shared.terminal.take() {
            drop(shared);
            this.done = true;
            return match terminal {
                Terminal::End => Poll::Ready(None),
                Terminal::Error(err) => Poll::Ready(Some(Err(err))),
            };
        }

        shared.waker = Some(cx.waker().clone());
        drop(shared);

        // 有拉取需求：恢复源（源在 data() 返回 false 后会自行暂停）
        this.paused = false;
        this.source.resume();
        Poll::Pending
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        if !self.done {
            debug!("Push stream cancelled, destroying source");
            self.source.destroy();
        }
    }
}
