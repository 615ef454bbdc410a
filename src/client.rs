//! EventSource 客户端：连接状态机、读取循环与自动重连
//!
//! 每个客户端持有一个 [`ConnectionState`]，由一把互斥锁保护；锁从不跨越
//! `.await`，也从不在调用用户回调时持有，因此回调里可以安全地调用
//! `close()` / `connect()`。

use crate::adapter::adapt;
use crate::decode::Utf8Decoder;
use crate::error::{ConfigError, SseError, TransportError};
use crate::event::{Message, ReadyState};
use crate::multicast::{Fanout, MessageStream, SubscriptionId};
use crate::options::{
    validate, Callbacks, EventSourceOptions, RedirectPolicy, ReferrerPolicy, ReconnectInfo,
    RequestCredentials, RequestMode, UrlInput,
};
use crate::parser::{MessageParser, ParsedItem};
use crate::reconnect::ReconnectScheduler;
use crate::transport::{CacheMode, RequestInit, SharedTransport, TransportFuture, TransportResponse};
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{HeaderValue, ACCEPT};
use http::{HeaderMap, Method};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const LAST_EVENT_ID: &str = "last-event-id";

/// 进行中的请求；存在即表示有且只有一个 HTTP 请求未结束
struct ActiveRequest {
    id: u64,
    abort: CancellationToken,
}

struct ConnectionState {
    ready_state: ReadyState,
    current_url: Url,
    last_event_id: Option<String>,
    reconnect_delay: Duration,
    active_request: Option<ActiveRequest>,
    scheduler: ReconnectScheduler,
    next_attempt: u64,
}

impl ConnectionState {
    fn is_current(&self, attempt: u64) -> bool {
        self.active_request.as_ref().map(|r| r.id) == Some(attempt)
    }
}

/// 构造时固定下来的请求参数（请求头在构造时复制）
struct RequestTemplate {
    url: Url,
    method: Method,
    body: Option<Bytes>,
    headers: HeaderMap,
    mode: Option<RequestMode>,
    credentials: Option<RequestCredentials>,
    redirect: Option<RedirectPolicy>,
    referrer: Option<String>,
    referrer_policy: Option<ReferrerPolicy>,
}

struct Inner {
    transport: SharedTransport,
    request: RequestTemplate,
    callbacks: Callbacks,
    state: Mutex<ConnectionState>,
    parser: Mutex<Box<dyn MessageParser>>,
    fanout: Fanout,
    runtime: Handle,
}

/// 一次连接尝试如何结束
enum AttemptEnd {
    /// 响应体正常结束
    Completed,
    /// HTTP 204：已关闭，不重连
    Terminated,
    Failed { error: SseError, connected: bool },
}

impl AttemptEnd {
    fn aborted(connected: bool) -> Self {
        AttemptEnd::Failed {
            error: SseError::Transport(TransportError::Aborted),
            connected,
        }
    }
}

/// EventSource 客户端句柄
///
/// 句柄可以廉价地 clone；最后一个句柄被 drop 时客户端自动关闭。
///
/// ```rust,no_run
/// use sse_eventsource::EventSource;
/// use futures_util::StreamExt;
///
/// # async fn example() -> Result<(), sse_eventsource::ConfigError> {
/// let es = EventSource::new("https://example.com/events")?;
/// let mut messages = es.messages();
/// while let Some(msg) = messages.next().await {
///     println!("{:?}: {}", msg.event, msg.data);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventSource {
    inner: Arc<Inner>,
}

impl EventSource {
    /// 使用默认配置连接到 `url`
    pub fn new(url: impl Into<UrlInput>) -> Result<Self, ConfigError> {
        Self::with_options(EventSourceOptions::new(url))
    }

    /// 校验配置并立即开始连接；必须在 tokio 运行时内调用
    pub fn with_options(mut options: EventSourceOptions) -> Result<Self, ConfigError> {
        let validated = validate(&options)?;
        let parser = options.take_parser();

        let fanout = Fanout::new();
        if let Some(on_message) = options.callbacks.on_message.clone() {
            fanout.subscribe(on_message);
        }

        let inner = Arc::new(Inner {
            transport: validated.transport,
            request: RequestTemplate {
                url: validated.url.clone(),
                method: options.method,
                body: options.body,
                headers: options.headers,
                mode: options.mode,
                credentials: options.credentials,
                redirect: options.redirect,
                referrer: options.referrer,
                referrer_policy: options.referrer_policy,
            },
            callbacks: options.callbacks,
            state: Mutex::new(ConnectionState {
                ready_state: ReadyState::Closed,
                current_url: validated.url,
                last_event_id: validated.initial_last_event_id,
                reconnect_delay: options.reconnect_delay,
                active_request: None,
                scheduler: ReconnectScheduler::new(),
                next_attempt: 0,
            }),
            parser: Mutex::new(parser),
            fanout,
            runtime: validated.runtime,
        });

        let es = EventSource { inner };
        info!(url = %es.inner.request.url, "Starting EventSource");
        es.connect();
        Ok(es)
    }

    /// 开始连接；已有请求进行中时什么也不做
    ///
    /// 创建时会自动调用一次。`close()` 之后或收到 HTTP 204 之后可再次调用。
    pub fn connect(&self) {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        if state.active_request.is_some() {
            debug!(url = %inner.request.url, "Request already in flight, connect() ignored");
            return;
        }

        state.scheduler.cancel();
        state.ready_state = ReadyState::Connecting;
        inner.fanout.reopen();
        state.next_attempt += 1;
        let attempt = state.next_attempt;
        let abort = CancellationToken::new();
        state.active_request = Some(ActiveRequest {
            id: attempt,
            abort: abort.clone(),
        });
        let init = inner.request_init(&state, abort.clone());
        drop(state);

        debug!(url = %inner.request.url, attempt = attempt, "Connecting");
        let request = inner.transport.fetch(&inner.request.url, init);
        inner
            .runtime
            .spawn(run_attempt(Arc::downgrade(inner), attempt, abort, request));
    }

    /// 关闭连接并阻止自动重连
    ///
    /// 取消进行中的请求、清除已计划的重连，并结束所有 [`MessageStream`]。
    pub fn close(&self) {
        let inner = &self.inner;
        let (active, had_timer) = {
            let mut state = inner.lock_state();
            // 与 connect() 的 reopen 互斥：锁顺序总是先 state 后 fanout
            inner.fanout.teardown();
            if state.ready_state == ReadyState::Closed
                && state.active_request.is_none()
                && !state.scheduler.is_armed()
            {
                return;
            }
            state.ready_state = ReadyState::Closed;
            (state.active_request.take(), state.scheduler.cancel())
        };

        if let Some(request) = &active {
            request.abort.cancel();
        }
        inner.reset_parser();

        info!(
            url = %inner.request.url,
            aborted_request = active.is_some(),
            cancelled_reconnect = had_timer,
            "EventSource closed"
        );
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.lock_state().ready_state
    }

    /// 当前 URL；跟随重定向后为最终地址
    pub fn url(&self) -> Url {
        self.inner.lock_state().current_url.clone()
    }

    /// 最近收到的消息 ID；尚未收到带 ID 的消息时为初始值
    pub fn last_event_id(&self) -> Option<String> {
        self.inner.lock_state().last_event_id.clone()
    }

    /// 当前使用的重连间隔
    pub fn reconnect_delay(&self) -> Duration {
        self.inner.lock_state().reconnect_delay
    }

    /// 新建一个异步迭代句柄
    ///
    /// 每个句柄独立接收此后的所有消息；客户端关闭后迭代结束。
    pub fn messages(&self) -> MessageStream {
        self.inner.fanout.stream()
    }

    /// 同步迭代：不支持，总是返回错误
    pub fn iter(&self) -> Result<std::iter::Empty<Message>, SseError> {
        Err(SseError::SyncIteration)
    }

    /// 注册回调订阅者，按注册顺序同步调用
    pub fn subscribe(&self, f: impl Fn(&Message) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.fanout.subscribe(Arc::new(f))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.fanout.unsubscribe(id)
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("EventSource")
            .field("url", &state.current_url.as_str())
            .field("ready_state", &state.ready_state)
            .field("last_event_id", &state.last_event_id)
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_parser(&self) {
        self.parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    fn handle(self: &Arc<Self>) -> EventSource {
        EventSource {
            inner: self.clone(),
        }
    }

    fn request_init(&self, state: &ConnectionState, abort: CancellationToken) -> RequestInit {
        // Accept 在前，用户请求头可以覆盖；Last-Event-ID 最后写入
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        for (name, value) in self.request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(id) = state.last_event_id.as_deref().filter(|id| !id.is_empty()) {
            match HeaderValue::from_str(id) {
                Ok(value) => {
                    debug!(last_event_id = %id, "Setting Last-Event-ID header");
                    headers.insert(LAST_EVENT_ID, value);
                }
                Err(_) => warn!(last_event_id = ?id, "Last-Event-ID is not a valid header value, omitted"),
            }
        }

        RequestInit {
            method: self.request.method.clone(),
            headers,
            body: self.request.body.clone(),
            mode: self.request.mode,
            credentials: self.request.credentials,
            redirect: self.request.redirect,
            referrer: self.request.referrer.clone(),
            referrer_policy: self.request.referrer_policy,
            cache: CacheMode::NoStore,
            signal: abort,
        }
    }

    /// 把文本喂给解析器并处理产出；`close()` 之后立即停止
    fn feed(&self, attempt: u64, abort: &CancellationToken, text: &str) {
        let items = self
            .parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .feed(text);

        for item in items {
            if abort.is_cancelled() {
                return;
            }
            match item {
                ParsedItem::Retry(ms) => {
                    let mut state = self.lock_state();
                    if state.is_current(attempt) {
                        debug!(retry_ms = ms, "Server requested retry interval update");
                        state.reconnect_delay = Duration::from_millis(ms);
                    }
                }
                ParsedItem::Message(message) => {
                    {
                        let mut state = self.lock_state();
                        if !state.is_current(attempt) {
                            return;
                        }
                        if let Some(id) = &message.id {
                            state.last_event_id = Some(id.clone());
                        }
                    }
                    self.fanout.dispatch(&message);
                }
            }
        }
    }

    /// 一次尝试结束后的收尾：决定是否重连
    fn finish_attempt(self: &Arc<Self>, attempt: u64, end: AttemptEnd) {
        {
            let mut state = self.lock_state();
            // close() 或新的 connect() 已经接管
            if !state.is_current(attempt) {
                return;
            }
            state.active_request = None;
            state.ready_state = ReadyState::Connecting;
        }

        let url = &self.request.url;
        match end {
            AttemptEnd::Terminated => {}
            AttemptEnd::Completed => {
                info!(url = %url, "Connection ended, scheduling reconnect");
                self.reset_parser();
                self.schedule_reconnect();
                self.fire_disconnect();
            }
            AttemptEnd::Failed { error, connected } => {
                warn!(url = %url, error = %error, connected = connected, "Connection attempt failed, scheduling reconnect");
                if connected {
                    self.reset_parser();
                    self.schedule_reconnect();
                    self.fire_disconnect();
                } else {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let delay = {
            let state = self.lock_state();
            if state.ready_state == ReadyState::Closed {
                return;
            }
            state.reconnect_delay
        };

        if let Some(cb) = &self.callbacks.on_schedule_reconnect {
            cb(&self.handle(), ReconnectInfo { delay });
        }

        let mut state = self.lock_state();
        // 回调里调用了 close() 或 connect()
        if state.ready_state == ReadyState::Closed || state.active_request.is_some() {
            return;
        }
        state.ready_state = ReadyState::Connecting;
        let weak = Arc::downgrade(self);
        state.scheduler.arm(&self.runtime, delay, move |timer| {
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(timer);
            }
        });
        debug!(url = %self.request.url, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
    }

    fn on_timer(self: &Arc<Self>, timer: u64) {
        {
            let mut state = self.lock_state();
            if !state.scheduler.take_fired(timer) || state.ready_state == ReadyState::Closed {
                return;
            }
        }
        self.handle().connect();
    }

    fn fire_connect(self: &Arc<Self>) {
        if let Some(cb) = &self.callbacks.on_connect {
            cb(&self.handle());
        }
    }

    fn fire_disconnect(self: &Arc<Self>) {
        if let Some(cb) = &self.callbacks.on_disconnect {
            cb(&self.handle());
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.ready_state = ReadyState::Closed;
        if let Some(request) = state.active_request.take() {
            request.abort.cancel();
        }
        state.scheduler.cancel();
        self.fanout.teardown();
    }
}

async fn run_attempt(
    weak: Weak<Inner>,
    attempt: u64,
    abort: CancellationToken,
    request: TransportFuture,
) {
    let response = tokio::select! {
        biased;
        _ = abort.cancelled() => Err(SseError::Transport(TransportError::Aborted)),
        response = request => response.map_err(SseError::from),
    };

    let end = match response {
        Ok(response) => read_response(&weak, attempt, &abort, response).await,
        Err(error) => AttemptEnd::Failed {
            error,
            connected: false,
        },
    };

    // 由 close() 引起的中止是预期结果
    if let AttemptEnd::Failed { error, .. } = &end {
        if error.is_abort() && abort.is_cancelled() {
            debug!(attempt = attempt, "Request aborted by close()");
            return;
        }
    }

    if let Some(inner) = weak.upgrade() {
        inner.finish_attempt(attempt, end);
    }
}

async fn read_response(
    weak: &Weak<Inner>,
    attempt: u64,
    abort: &CancellationToken,
    response: TransportResponse,
) -> AttemptEnd {
    let TransportResponse {
        body,
        url,
        status,
        redirected,
    } = response;

    let mut stream = {
        let Some(inner) = weak.upgrade() else {
            return AttemptEnd::aborted(false);
        };

        inner.fire_connect();
        inner.reset_parser();
        if abort.is_cancelled() {
            return AttemptEnd::aborted(true);
        }

        if status == 204 {
            info!(url = %inner.request.url, "Server responded with HTTP 204, closing");
            inner.fire_disconnect();
            inner.handle().close();
            return AttemptEnd::Terminated;
        }

        let Some(body) = body else {
            return AttemptEnd::Failed {
                error: SseError::MissingBody,
                connected: false,
            };
        };

        {
            let mut state = inner.lock_state();
            if !state.is_current(attempt) {
                return AttemptEnd::aborted(true);
            }
            if redirected {
                debug!(from = %state.current_url, to = %url, "Request was redirected");
                state.current_url = url;
            }
            state.ready_state = ReadyState::Open;
        }
        info!(url = %inner.request.url, status = status, "SSE connection established");

        adapt(body)
    };

    let mut decoder = Utf8Decoder::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => return AttemptEnd::aborted(true),
            next = stream.next() => next,
        };

        let Some(inner) = weak.upgrade() else {
            return AttemptEnd::aborted(true);
        };

        match next {
            Some(Ok(chunk)) => {
                let text = decoder.decode(&chunk);
                if !text.is_empty() {
                    inner.feed(attempt, abort, &text);
                }
            }
            Some(Err(error)) => {
                return AttemptEnd::Failed {
                    error: SseError::Stream(error),
                    connected: true,
                };
            }
            None => {
                let tail = decoder.finish();
                if !tail.is_empty() {
                    inner.feed(attempt, abort, &tail);
                }
                return AttemptEnd::Completed;
            }
        }
    }
}
