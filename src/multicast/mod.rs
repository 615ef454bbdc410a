//! 消息的一对多分发：回调订阅者与异步迭代句柄

mod fanout;

pub(crate) use fanout::Fanout;
pub use fanout::{MessageStream, SubscriptionId};
