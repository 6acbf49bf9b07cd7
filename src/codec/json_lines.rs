//! 行分隔 JSON（NDJSON）解码器

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use super::lines::{LineDecoder, LineError};

/// 解码出的一帧
#[derive(Debug)]
pub enum Frame<T> {
    Value(T),
    /// 无法解析的行，保留原文交给调用方决定如何处理
    Malformed { line: String, error: serde_json::Error },
}

/// 有状态的 JSON 行解码器
///
/// 每次 `push` 一个网络分块，返回该分块补全的所有帧；
/// 输入结束后调用 `finish` 处理剩余缓冲。
#[derive(Debug)]
pub struct JsonLineDecoder<T> {
    lines: LineDecoder,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonLineDecoder<T> {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            lines: LineDecoder::with_max_length(max_line_bytes),
            _marker: PhantomData,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame<T>>, LineError> {
        Ok(self.lines.push(chunk)?.into_iter().map(decode).collect())
    }

    pub fn finish(&mut self) -> Result<Option<Frame<T>>, LineError> {
        Ok(self.lines.finish()?.map(decode))
    }
}

fn decode<T: DeserializeOwned>(line: String) -> Frame<T> {
    match serde_json::from_str(line.trim()) {
        Ok(value) => Frame::Value(value),
        Err(error) => Frame::Malformed { line, error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_MAX_LINE_BYTES;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Piece {
        text: String,
    }

    fn decoder() -> JsonLineDecoder<Piece> {
        JsonLineDecoder::new(DEFAULT_MAX_LINE_BYTES)
    }

    fn values(frames: Vec<Frame<Piece>>) -> Vec<String> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                Frame::Value(p) => Some(p.text),
                Frame::Malformed { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_object_split_across_reads() {
        let mut decoder = decoder();
        assert!(decoder.push(br#"{"text":"He"#).unwrap().is_empty());
        let frames = decoder.push(b"l\"}\n{\"text\":\"lo\"}\n").unwrap();
        assert_eq!(values(frames), vec!["Hel", "lo"]);
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_leftover_parsed_on_finish() {
        let mut decoder = decoder();
        assert!(decoder.push(br#"{"text":"tail"}"#).unwrap().is_empty());
        match decoder.finish().unwrap() {
            Some(Frame::Value(p)) => assert_eq!(p.text, "tail"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_keeps_raw_text() {
        let mut decoder = decoder();
        let frames = decoder
            .push(b"<html>bad gateway</html>\n{\"text\":\"ok\"}\n")
            .unwrap();
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Frame::Malformed { line, .. } => assert_eq!(line, "<html>bad gateway</html>"),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(matches!(&frames[1], Frame::Value(p) if p.text == "ok"));
    }

    #[test]
    fn test_oversized_line_is_an_error() {
        let mut decoder = JsonLineDecoder::<Piece>::new(32);
        let long = format!("{{\"text\":\"{}\"}}\n", "x".repeat(64));
        assert_eq!(
            decoder.push(long.as_bytes()).unwrap_err(),
            LineError::TooLong { limit: 32 }
        );
    }
}
