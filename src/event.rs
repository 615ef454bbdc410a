//! SSE 消息与连接状态类型

use std::fmt;

/// 服务端发送的一条消息（解析器产出后不再修改）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// 消息 ID；没有 `id` 字段时为 None
    pub id: Option<String>,
    /// 事件名；没有 `event` 字段时为 None
    pub event: Option<String>,
    pub data: String,
}

impl Message {
    /// 使用给定的数据创建消息
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// 设置事件名
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// 设置消息 ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// 连接所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// 正在连接，或已计划重连
    Connecting,
    /// 已连接，正在接收数据
    Open,
    /// 已关闭（手动关闭或收到 HTTP 204），不会自动重连
    Closed,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closed => "closed",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_optional_fields() {
        let msg = Message::new("Counter is at 1").with_event("counter").with_id("1");
        assert_eq!(msg.event.as_deref(), Some("counter"));
        assert_eq!(msg.id.as_deref(), Some("1"));
        assert_eq!(Message::new("x"), Message { id: None, event: None, data: "x".into() });
    }

    #[test]
    fn ready_state_display() {
        assert_eq!(ReadyState::Connecting.to_string(), "connecting");
        assert_eq!(ReadyState::Open.to_string(), "open");
        assert_eq!(ReadyState::Closed.to_string(), "closed");
    }
}
