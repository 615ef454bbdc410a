//! 客户端配置与构造前校验

use crate::client::EventSource;
use crate::error::ConfigError;
use crate::event::Message;
use crate::parser::{MessageParser, SseParser};
use crate::transport::{self, SharedTransport, Transport};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// 默认重连间隔（服务端可通过 `retry:` 覆盖）
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// 请求的 CORS 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Cors,
    NoCors,
    SameOrigin,
}

/// 是否携带凭据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCredentials {
    Include,
    Omit,
    SameOrigin,
}

/// 遇到重定向时的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    Follow,
    Error,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferrerPolicy {
    NoReferrer,
    NoReferrerWhenDowngrade,
    Origin,
    OriginWhenCrossOrigin,
    SameOrigin,
    StrictOrigin,
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

/// 计划重连时传给回调的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectInfo {
    pub delay: Duration,
}

pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
pub type LifecycleCallback = Arc<dyn Fn(&EventSource) + Send + Sync>;
pub type ReconnectCallback = Arc<dyn Fn(&EventSource, ReconnectInfo) + Send + Sync>;

/// 构造时接受的 URL 形式：字符串或已解析的 [`Url`]
#[derive(Debug, Clone)]
pub enum UrlInput {
    Str(String),
    Url(Url),
}

impl From<&str> for UrlInput {
    fn from(s: &str) -> Self {
        UrlInput::Str(s.to_string())
    }
}

impl From<String> for UrlInput {
    fn from(s: String) -> Self {
        UrlInput::Str(s)
    }
}

impl From<&String> for UrlInput {
    fn from(s: &String) -> Self {
        UrlInput::Str(s.clone())
    }
}

impl From<Url> for UrlInput {
    fn from(url: Url) -> Self {
        UrlInput::Url(url)
    }
}

impl From<&Url> for UrlInput {
    fn from(url: &Url) -> Self {
        UrlInput::Url(url.clone())
    }
}

#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub on_message: Option<MessageCallback>,
    pub on_connect: Option<LifecycleCallback>,
    pub on_disconnect: Option<LifecycleCallback>,
    pub on_schedule_reconnect: Option<ReconnectCallback>,
}

/// EventSource 配置
///
/// ```rust,no_run
/// use sse_eventsource::{EventSource, EventSourceOptions};
///
/// # async fn example() -> Result<(), sse_eventsource::ConfigError> {
/// let options = EventSourceOptions::new("https://example.com/events")
///     .header("Authorization", "Bearer token")
///     .on_message(|msg| println!("{:?}", msg));
/// let es = EventSource::with_options(options)?;
/// # es.close();
/// # Ok(())
/// # }
/// ```
pub struct EventSourceOptions {
    pub(crate) url: UrlInput,
    pub(crate) transport: Option<SharedTransport>,
    pub(crate) initial_last_event_id: Option<String>,
    pub(crate) method: Method,
    pub(crate) body: Option<Bytes>,
    pub(crate) headers: HeaderMap,
    pub(crate) header_error: Option<String>,
    pub(crate) mode: Option<RequestMode>,
    pub(crate) credentials: Option<RequestCredentials>,
    pub(crate) redirect: Option<RedirectPolicy>,
    pub(crate) referrer: Option<String>,
    pub(crate) referrer_policy: Option<ReferrerPolicy>,
    pub(crate) callbacks: Callbacks,
    pub(crate) parser: Option<Box<dyn MessageParser>>,
    pub(crate) reconnect_delay: Duration,
}

impl EventSourceOptions {
    pub fn new(url: impl Into<UrlInput>) -> Self {
        Self {
            url: url.into(),
            transport: None,
            initial_last_event_id: None,
            method: Method::GET,
            body: None,
            headers: HeaderMap::new(),
            header_error: None,
            mode: None,
            credentials: None,
            redirect: None,
            referrer: None,
            referrer_policy: None,
            callbacks: Callbacks::default(),
            parser: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// 替换默认 transport
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// 首次连接使用的 `Last-Event-ID`
    pub fn initial_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.initial_last_event_id = Some(id.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// 添加一个请求头；非法的名称或值在构造时报错
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                self.header_error.get_or_insert_with(|| "请求头名称或值无效".to_string());
            }
        }
        self
    }

    /// 合并一组请求头
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn credentials(mut self, credentials: RequestCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn referrer_policy(mut self, policy: ReferrerPolicy) -> Self {
        self.referrer_policy = Some(policy);
        self
    }

    /// 每收到一条消息调用一次
    pub fn on_message(mut self, f: impl Fn(&Message) + Send + Sync + 'static) -> Self {
        self.callbacks.on_message = Some(Arc::new(f));
        self
    }

    /// 每次建立连接（包括重连）调用一次
    pub fn on_connect(mut self, f: impl Fn(&EventSource) + Send + Sync + 'static) -> Self {
        self.callbacks.on_connect = Some(Arc::new(f));
        self
    }

    /// 每次连接断开调用一次；除非在回调里 `close()`，之后会自动重连
    pub fn on_disconnect(mut self, f: impl Fn(&EventSource) + Send + Sync + 'static) -> Self {
        self.callbacks.on_disconnect = Some(Arc::new(f));
        self
    }

    /// 计划重连时调用，携带本次使用的延迟
    pub fn on_schedule_reconnect(
        mut self,
        f: impl Fn(&EventSource, ReconnectInfo) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_schedule_reconnect = Some(Arc::new(f));
        self
    }

    /// 替换默认的 [`SseParser`]
    pub fn parser(mut self, parser: impl MessageParser + 'static) -> Self {
        self.parser = Some(Box::new(parser));
        self
    }

    /// 服务端未发送 `retry:` 之前使用的重连间隔
    pub fn default_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub(crate) fn take_parser(&mut self) -> Box<dyn MessageParser> {
        self.parser.take().unwrap_or_else(|| Box::new(SseParser::new()))
    }
}

impl fmt::Debug for EventSourceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSourceOptions")
            .field("url", &self.url)
            .field("initial_last_event_id", &self.initial_last_event_id)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("redirect", &self.redirect)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

/// 校验通过后的关键输入
pub(crate) struct Validated {
    pub transport: SharedTransport,
    pub url: Url,
    pub initial_last_event_id: Option<String>,
    pub runtime: tokio::runtime::Handle,
}

/// 构造前校验：不产生任何副作用，也不发起连接
pub(crate) fn validate(options: &EventSourceOptions) -> Result<Validated, ConfigError> {
    let transport = match &options.transport {
        Some(transport) => transport.clone(),
        None => transport::default_transport().ok_or(ConfigError::NoTransport)?,
    };

    // 定时器与取消都依赖 tokio 运行时
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

    let url = match &options.url {
        UrlInput::Url(url) => url.clone(),
        UrlInput::Str(s) => {
            Url::parse(s).map_err(|e| ConfigError::InvalidUrl(format!("{s:?}: {e}")))?
        }
    };
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl(format!("{:?} 不是层级式 URL", url.as_str())));
    }

    if let Some(id) = &options.initial_last_event_id {
        if HeaderValue::from_str(id).is_err() || id.contains('\0') {
            return Err(ConfigError::InvalidLastEventId(format!(
                "{id:?} 无法作为 Last-Event-ID 请求头发送"
            )));
        }
    }

    if let Some(err) = &options.header_error {
        return Err(ConfigError::InvalidHeader(err.clone()));
    }

    Ok(Validated {
        transport,
        url,
        initial_last_event_id: options.initial_last_event_id.clone(),
        runtime,
    })
}
