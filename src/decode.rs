//! 流式 UTF-8 解码：字节分片 -> 文本分片
//!
//! EventSource 的响应体总是 UTF-8。多字节序列可能被切在两个分片之间，
//! 未完成的尾部会留到下一个分片再解码。

const BOM: &str = "\u{feff}";

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
    bom_checked: bool,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码一个分片；非法序列替换为 U+FFFD
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // valid_up_to 之前的字节已验证
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                        None => {
                            // 末尾是不完整的序列
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        self.strip_bom(out)
    }

    /// 流结束：剩余的不完整序列按非法处理
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        self.strip_bom(char::REPLACEMENT_CHARACTER.to_string())
    }

    fn strip_bom(&mut self, text: String) -> String {
        if self.bom_checked || text.is_empty() {
            return text;
        }
        self.bom_checked = true;
        match text.strip_prefix(BOM) {
            Some(rest) => rest.to_string(),
            None => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_split_across_chunks() {
        let bytes = "data: 你好\n".as_bytes();
        let mut d = Utf8Decoder::new();
        let mut text = String::new();
        for b in bytes {
            text.push_str(&d.decode(std::slice::from_ref(b)));
        }
        text.push_str(&d.finish());
        assert_eq!(text, "data: 你好\n");
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn truncated_tail_is_replaced_on_finish() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&[b'x', 0xe4, 0xbd]), "x");
        assert_eq!(d.finish(), "\u{fffd}");
    }

    #[test]
    fn leading_bom_is_stripped_once() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(&[0xef, 0xbb]), "");
        assert_eq!(d.decode(&[0xbf, b'a']), "a");
        assert_eq!(d.decode("\u{feff}b".as_bytes()), "\u{feff}b");
    }
}
