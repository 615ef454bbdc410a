//! Fanout - 消息的一对多分发
//!
//! 两类订阅者共用一个有序列表：
//! - 回调订阅者：同步调用，按注册顺序
//! - 异步迭代订阅者：每个 [`MessageStream`] 有自己的无界 mpsc channel，
//!   挂起的拉取与缓冲的消息由 channel 配对，二者不会同时非空

use crate::event::Message;
use crate::options::MessageCallback;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// 订阅者的唯一标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

static NEXT_SUBSCRIPTION_ID: AtomicUsize = AtomicUsize::new(0);

impl SubscriptionId {
    fn new() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone)]
enum Subscriber {
    Callback(MessageCallback),
    Queue {
        tx: mpsc::UnboundedSender<Message>,
        torn_down: Arc<AtomicBool>,
    },
}

#[derive(Default)]
struct Subscribers {
    list: Vec<(SubscriptionId, Subscriber)>,
    /// teardown 之后、reopen 之前新建的迭代句柄直接结束
    closed: bool,
}

#[derive(Default)]
struct FanoutInner {
    subscribers: Mutex<Subscribers>,
}

impl FanoutInner {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.list.len();
        subs.list.retain(|(sid, _)| *sid != id);
        before != subs.list.len()
    }
}

#[derive(Clone, Default)]
pub(crate) struct Fanout {
    inner: Arc<FanoutInner>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调订阅者
    pub fn subscribe(&self, callback: MessageCallback) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.inner.lock().list.push((id, Subscriber::Callback(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    /// 新建一个异步迭代句柄，并把它的推送端注册为订阅者
    ///
    /// 已 teardown 时返回已结束的句柄；检查与注册在同一把锁内完成。
    pub fn stream(&self) -> MessageStream {
        let mut subs = self.inner.lock();
        if subs.closed {
            return Self::closed_stream();
        }

        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let torn_down = Arc::new(AtomicBool::new(false));

        subs.list.push((
            id,
            Subscriber::Queue {
                tx,
                torn_down: torn_down.clone(),
            },
        ));
        drop(subs);
        debug!(subscriber_id = id.0, "Message stream subscribed");

        MessageStream {
            id,
            rx,
            torn_down,
            fanout: Arc::downgrade(&self.inner),
        }
    }

    /// 已结束的迭代句柄
    fn closed_stream() -> MessageStream {
        let (_, rx) = mpsc::unbounded_channel();
        MessageStream {
            id: SubscriptionId::new(),
            rx,
            torn_down: Arc::new(AtomicBool::new(true)),
            fanout: Weak::new(),
        }
    }

    /// 按注册顺序同步分发给所有订阅者
    ///
    /// 先取快照再释放锁，回调里可以订阅、退订或关闭客户端。
    pub fn dispatch(&self, message: &Message) {
        let subs: Vec<Subscriber> = self.inner.lock().list.iter().map(|(_, s)| s.clone()).collect();

        for sub in subs {
            match sub {
                Subscriber::Callback(cb) => cb(message),
                Subscriber::Queue { tx, torn_down } => {
                    if torn_down.load(Ordering::SeqCst) {
                        continue;
                    }
                    // 接收端已 drop 时由 MessageStream::drop 负责退订
                    let _ = tx.send(message.clone());
                }
            }
        }
    }

    /// 关闭所有异步迭代句柄：挂起的拉取以"没有更多值"结束，缓冲的消息被丢弃。
    /// 之后新建的句柄也立即结束，直到 [`Fanout::reopen`]。
    pub fn teardown(&self) {
        let mut subs = self.inner.lock();
        subs.closed = true;
        let before = subs.list.len();
        subs.list.retain(|(_, sub)| match sub {
            Subscriber::Queue { torn_down, .. } => {
                torn_down.store(true, Ordering::SeqCst);
                false
            }
            Subscriber::Callback(_) => true,
        });
        let removed = before - subs.list.len();
        if removed > 0 {
            debug!(removed = removed, "Message streams torn down");
        }
    }

    /// 重新接受新的迭代句柄（客户端重新连接时）
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().list.len()
    }
}

/// 异步迭代句柄：`Stream<Item = Message>`
///
/// 客户端关闭后结束；drop 时自动退订。
pub struct MessageStream {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Message>,
    torn_down: Arc<AtomicBool>,
    fanout: Weak<FanoutInner>,
}

impl MessageStream {
    /// 接收下一条消息；客户端关闭后返回 None
    pub async fn recv(&mut self) -> Option<Message> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// 提前结束迭代：退订并丢弃缓冲的消息
    pub fn cancel(&mut self) {
        self.torn_down.store(true, Ordering::SeqCst);
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.remove(self.id);
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            // 分发与关闭之间的竞争：关闭优先
            Poll::Ready(Some(_)) if self.torn_down.load(Ordering::SeqCst) => Poll::Ready(None),
            other => other,
        }
    }
}

impl Stream for MessageStream {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().poll_recv(cx)
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if let Some(fanout) = self.fanout.upgrade() {
            if fanout.remove(self.id) {
                debug!(subscriber_id = self.id.0, "Message stream unsubscribed");
            }
        }
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("id", &self.id)
            .field("torn_down", &self.torn_down.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fanout_basic() {
        let fanout = Fanout::new();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        fanout.subscribe(Arc::new(move |m: &Message| seen_cb.lock().unwrap().push(m.data.clone())));
        let mut stream1 = fanout.stream();
        let mut stream2 = fanout.stream();
        assert_eq!(fanout.subscriber_count(), 3);

        fanout.dispatch(&Message::new("hello"));
        fanout.dispatch(&Message::new("world"));

        assert_eq!(*seen.lock().unwrap(), vec!["hello", "world"]);
        for stream in [&mut stream1, &mut stream2] {
            assert_eq!(stream.next().await.unwrap().data, "hello");
            assert_eq!(stream.next().await.unwrap().data, "world");
        }
    }

    #[tokio::test]
    async fn pending_pull_is_resolved_by_next_message() {
        let fanout = Fanout::new();
        let mut stream = fanout.stream();

        let pull = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        fanout.dispatch(&Message::new("late"));

        assert_eq!(pull.await.unwrap().unwrap().data, "late");
    }

    #[tokio::test]
    async fn teardown_ends_pending_pull() {
        let fanout = Fanout::new();
        let mut waiting = fanout.stream();
        fanout.subscribe(Arc::new(|_: &Message| {}));

        let pull = tokio::spawn(async move { waiting.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        fanout.teardown();

        assert_eq!(pull.await.unwrap(), None);
        // 回调订阅者保留
        assert_eq!(fanout.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn teardown_drops_buffered_messages() {
        let fanout = Fanout::new();
        let mut stream = fanout.stream();
        fanout.dispatch(&Message::new("never read"));
        fanout.teardown();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_stream_drop_unsubscribes() {
        let fanout = Fanout::new();
        {
            let _stream = fanout.stream();
            assert_eq!(fanout.subscriber_count(), 1);
        }
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn cancel_discards_buffered_messages() {
        let fanout = Fanout::new();
        let mut stream = fanout.stream();
        fanout.dispatch(&Message::new("a"));
        stream.cancel();
        assert_eq!(stream.recv().await, None);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_callback() {
        let fanout = Fanout::new();
        let id = fanout.subscribe(Arc::new(|_: &Message| panic!("unsubscribed callback called")));
        assert!(fanout.unsubscribe(id));
        assert!(!fanout.unsubscribe(id));
        fanout.dispatch(&Message::new("x"));
    }

    #[tokio::test]
    async fn stream_after_teardown_ends_until_reopen() {
        let fanout = Fanout::new();
        fanout.teardown();

        let mut stream = fanout.stream();
        assert_eq!(fanout.subscriber_count(), 0);
        fanout.dispatch(&Message::new("dropped"));
        assert_eq!(stream.next().await, None);

        fanout.reopen();
        let mut stream = fanout.stream();
        fanout.dispatch(&Message::new("kept"));
        assert_eq!(stream.next().await.unwrap().data, "kept");
    }

    #[test]
    fn teardown_racing_stream_creation_never_leaves_open_stream() {
        // stream() 与 teardown() 在两个线程上交错
        for _ in 0..200 {
            let fanout = Fanout::new();
            let creator = {
                let fanout = fanout.clone();
                std::thread::spawn(move || (0..8).map(|_| fanout.stream()).collect::<Vec<_>>())
            };
            fanout.teardown();
            let streams = creator.join().unwrap();
            for stream in &streams {
                assert!(stream.torn_down.load(Ordering::SeqCst));
            }
        }
    }
}
