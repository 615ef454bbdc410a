//! SSE 增量解析器
//!
//! 输入已解码的文本分片，按 SSE 规则产出消息与 `retry` 通知。
//! 连接控制器只通过 [`MessageParser`] 使用它，可以替换为自定义实现。

use crate::event::Message;

/// 解析器的一次产出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedItem {
    /// 一条完整的消息
    Message(Message),
    /// 服务端要求的新重连间隔（毫秒）
    Retry(u64),
}

/// 连接控制器所依赖的解析器接口
pub trait MessageParser: Send {
    /// 喂入一个文本分片，返回本次解析产生的全部条目（按顺序）
    fn feed(&mut self, chunk: &str) -> Vec<ParsedItem>;

    /// 丢弃未完成的行和未完成的消息
    fn reset(&mut self);
}

/// 默认的 SSE 解析器
///
/// chunk（任意切分） -> line（按 \n / \r / \r\n 切） -> message（按 field/value 组装）
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    position: usize,
    discard_trailing_newline: bool, // 处理 \r\n 跨 chunk
    id: Option<String>,
    event: Option<String>,
    data: String,
    has_data: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_line(&mut self, line: &[u8], out: &mut Vec<ParsedItem>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }

        // comment 行
        if line[0] == b':' {
            return;
        }

        // 没有 ':' 时整行是字段名，值为空
        let (field, value) = match line.iter().position(|&b| b == b':') {
            Some(idx) => {
                let mut value_start = idx + 1;
                if line.get(value_start) == Some(&b' ') {
                    value_start += 1;
                }
                (&line[..idx], &line[value_start..])
            }
            None => (line, &[][..]),
        };

        match field {
            b"data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(&String::from_utf8_lossy(value));
                self.has_data = true;
            }
            b"event" => {
                self.event = Some(String::from_utf8_lossy(value).into_owned());
            }
            b"id" => {
                if !value.contains(&0) {
                    self.id = Some(String::from_utf8_lossy(value).into_owned());
                }
            }
            b"retry" => {
                if !value.is_empty() && value.iter().all(u8::is_ascii_digit) {
                    if let Ok(ms) = String::from_utf8_lossy(value).parse::<u64>() {
                        out.push(ParsedItem::Retry(ms));
                    }
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<ParsedItem>) {
        let id = self.id.take();
        let event = self.event.take().filter(|e| !e.is_empty());
        let data = std::mem::take(&mut self.data);

        // 没有 data 字段的消息不派发
        if std::mem::replace(&mut self.has_data, false) {
            out.push(ParsedItem::Message(Message { id, event, data }));
        }
    }
}

impl MessageParser for SseParser {
    fn feed(&mut self, chunk: &str) -> Vec<ParsedItem> {
        self.buffer.extend_from_slice(chunk.as_bytes());

        let mut out = Vec::new();
        let mut line_start = 0usize;

        while self.position < self.buffer.len() {
            // 上一轮以 \r 结尾时，紧跟的 \n 属于同一个行尾
            if self.discard_trailing_newline {
                if self.buffer[self.position] == b'\n' {
                    self.position += 1;
                    line_start = self.position;
                }
                self.discard_trailing_newline = false;
                continue;
            }

            let mut line_end: Option<usize> = None;
            while self.position < self.buffer.len() && line_end.is_none() {
                match self.buffer[self.position] {
                    b'\r' => {
                        self.discard_trailing_newline = true;
                        line_end = Some(self.position);
                    }
                    b'\n' => line_end = Some(self.position),
                    _ => {}
                }
                self.position += 1;
            }

            let Some(end) = line_end else {
                // 行未结束，等待下一个 chunk
                break;
            };

            let line = self.buffer[line_start..end].to_vec();
            self.on_line(&line, &mut out);
            line_start = self.position;
        }

        if line_start > 0 {
            self.buffer.drain(0..line_start);
            self.position = self.position.saturating_sub(line_start);
        }

        out
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.position = 0;
        self.discard_trailing_newline = false;
        self.id = None;
        self.event = None;
        self.data.clear();
        self.has_data = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(p: &mut SseParser, chunks: &[&str]) -> Vec<ParsedItem> {
        chunks.iter().flat_map(|c| p.feed(c)).collect()
    }

    #[test]
    fn pipeline_chunk_line_message_with_splits_and_crlf() {
        let mut p = SseParser::new();

        // 刻意切分：拆行、拆字段、拆 \r\n
        let items = feed_all(
            &mut p,
            &[
                "id: 1\r",
                "\n",
                ": this is a comment\r\n",
                "event: greeting\n",
                "data: hel",
                "lo\n",
                "data: world\r",
                "\n",
                "\r",
                "\n",
            ],
        );

        assert_eq!(
            items,
            vec![ParsedItem::Message(Message {
                id: Some("1".to_string()),
                event: Some("greeting".to_string()),
                data: "hello\nworld".to_string(),
            })]
        );
    }

    #[test]
    fn retry_is_reported_immediately_and_empty_event_is_not_dispatched() {
        let mut p = SseParser::new();
        let items = feed_all(&mut p, &["retry: 50\n", "\n", "retry: def\n\n"]);
        assert_eq!(items, vec![ParsedItem::Retry(50)]);
    }

    #[test]
    fn data_appends_across_multiple_lines() {
        let mut p = SseParser::new();
        let items = feed_all(
            &mut p,
            &["data:YHOO\n", "data: +2\n", "data\n", "data: 10\n", "\n"],
        );

        assert_eq!(items, vec![ParsedItem::Message(Message::new("YHOO\n+2\n\n10"))]);
    }

    #[test]
    fn id_is_scoped_to_one_message() {
        let mut p = SseParser::new();
        let items = feed_all(&mut p, &["id: 7\ndata: a\n\ndata: b\n\n"]);
        assert_eq!(
            items,
            vec![
                ParsedItem::Message(Message::new("a").with_id("7")),
                ParsedItem::Message(Message::new("b")),
            ]
        );
    }

    #[test]
    fn id_with_nul_is_ignored() {
        let mut p = SseParser::new();
        let items = feed_all(&mut p, &["id: a\0b\ndata: x\n\n"]);
        assert_eq!(items, vec![ParsedItem::Message(Message::new("x"))]);
    }

    #[test]
    fn reset_discards_partial_message() {
        let mut p = SseParser::new();
        assert!(p.feed("event: half\ndata: par").is_empty());
        p.reset();
        let items = p.feed("data: fresh\n\n");
        assert_eq!(items, vec![ParsedItem::Message(Message::new("fresh"))]);
    }

    #[test]
    fn reset_clears_pending_carriage_return() {
        let mut p = SseParser::new();
        p.feed("data: x\r");
        p.reset();
        // 新响应开头的 \n 是一个真正的空行
        let items = p.feed("\ndata: y\n\n");
        assert_eq!(items, vec![ParsedItem::Message(Message::new("y"))]);
    }
}
