//! 重连定时器
//!
//! 同一时间最多只有一个已装填的定时器。每个定时器带编号，
//! 触发时编号不匹配（已被取消或被新的定时器替换）则忽略。

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct ArmedTimer {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct ReconnectScheduler {
    next_id: u64,
    armed: Option<ArmedTimer>,
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 装填一次性定时器：`delay` 之后以定时器编号调用 `fire`
    ///
    /// 延迟在装填时确定，之后修改重连间隔不影响已装填的定时器。
    pub fn arm<F>(&mut self, runtime: &Handle, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.next_id += 1;
        let id = self.next_id;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(id);
        });
        self.armed = Some(ArmedTimer { id, handle });
        id
    }

    /// 取消已装填的定时器；没有定时器时什么也不做
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// 定时器触发时调用：编号仍有效则清除并返回 true
    pub fn take_fired(&mut self, id: u64) -> bool {
        match &self.armed {
            Some(timer) if timer.id == id => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
