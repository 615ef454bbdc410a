//! 把 `AsyncRead`（socket、管道、子进程输出等）包装成推送式源

use super::push::{PushListener, PushSource};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const READ_BUF_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Paused,
    Flowing,
    Destroyed,
}

/// 后台任务读取 `AsyncRead`，通过 listener 推送数据；
/// 暂停期间不发起新的读取。
pub struct ReaderSource<R> {
    reader: Option<R>,
    flow: Arc<watch::Sender<Flow>>,
    task: Option<JoinHandle<()>>,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        let (flow, _) = watch::channel(Flow::Paused);
        Self {
            reader: Some(reader),
            flow: Arc::new(flow),
            task: None,
        }
    }
}

/// 对端在结束前断开
fn is_premature_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
    )
}

/// 仅当当前状态为 `from` 时切换到 `to`；`Destroyed` 不会被覆盖
fn set_flow(flow: &watch::Sender<Flow>, from: Flow, to: Flow) {
    flow.send_if_modified(|state| {
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    });
}

async fn pump<R>(mut reader: R, flow: Arc<watch::Sender<Flow>>, listener: PushListener)
where
    R: AsyncRead + Unpin,
{
    let mut rx = flow.subscribe();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        // 等待进入 flowing 状态
        loop {
            let state = *rx.borrow_and_update();
            match state {
                Flow::Flowing => break,
                Flow::Destroyed => return,
                Flow::Paused => {
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            }
        }

        match reader.read(&mut buf).await {
            Ok(0) => {
                listener.end();
                return;
            }
            Ok(n) => {
                if !listener.data(buf[..n].to_vec()) {
                    set_flow(&flow, Flow::Flowing, Flow::Paused);
                    // 消费者可能在暂停生效前已清空缓冲，它的 resume 会落空
                    if !listener.is_full() {
                        set_flow(&flow, Flow::Paused, Flow::Flowing);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_premature_close(&e) => {
                listener.premature_close(Some(e));
                return;
            }
            Err(e) => {
                listener.error(e);
                return;
            }
        }
    }
}

impl<R> PushSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn start(&mut self, listener: PushListener) {
        if let Some(reader) = self.reader.take() {
            self.task = Some(tokio::spawn(pump(reader, self.flow.clone(), listener)));
        }
    }

    fn pause(&mut self) {
        set_flow(&self.flow, Flow::Flowing, Flow::Paused);
    }

    fn resume(&mut self) {
        set_flow(&self.flow, Flow::Paused, Flow::Flowing);
    }

    fn destroy(&mut self) {
        self.flow.send_replace(Flow::Destroyed);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<R> Drop for ReaderSource<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{adapt, ResponseBody};
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_until_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"data: one\n\n").await.unwrap();
        drop(client);

        let mut stream = adapt(ResponseBody::push(ReaderSource::new(server)));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, b"data: one\n\n");
    }

    #[tokio::test]
    async fn paused_source_does_not_read() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"abc").await.unwrap();

        let stream = adapt(ResponseBody::push(ReaderSource::new(server)));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // 没有拉取之前数据仍在管道里；drop 流后 destroy 释放 reader
        drop(stream);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(client.write_all(b"more").await.is_err());
    }

    #[tokio::test]
    async fn drains_more_than_high_water_mark() {
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let (mut client, server) = tokio::io::duplex(256 * 1024);
        client.write_all(&payload).await.unwrap();
        drop(client);

        let mut stream = adapt(ResponseBody::push(ReaderSource::new(server)));
        let out = tokio::time::timeout(std::time::Duration::from_secs(3), async {
            let mut out = Vec::new();
            while let Some(chunk) = stream.next().await {
                out.extend_from_slice(&chunk.unwrap());
            }
            out
        })
        .await
        .expect("reader stalled at the high-water mark");

        assert!(payload.len() > crate::adapter::HIGH_WATER_MARK);
        assert_eq!(out, payload);
    }

    #[test]
    fn premature_kinds() {
        assert!(is_premature_close(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_premature_close(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
