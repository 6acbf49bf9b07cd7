//! 按行切分的字节流缓冲

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// 单行默认上限：1 MiB
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    /// 缓冲区里攒了超过上限的字节却还没遇到换行
    #[error("line exceeds {limit} bytes without a newline")]
    TooLong { limit: usize },
}

/// 增量行解码器
///
/// 网络读取的分块边界是任意的：一行 JSON 可能被拆到多个分块里，
/// 一个多字节 UTF-8 字符也可能被拆开。切分交给 `LinesCodec`，
/// 它记住上次扫描到的位置，并在单行超过上限时报错，缓冲区不会无限增长。
#[derive(Debug)]
pub struct LineDecoder {
    codec: LinesCodec,
    buf: BytesMut,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            codec: LinesCodec::new_with_max_length(max_line_bytes),
            buf: BytesMut::new(),
        }
    }

    /// 追加一个分块，返回其中所有完整的非空行（去掉行尾 `\r`）
    ///
    /// 最后一段不完整的数据保留在缓冲区中，等待后续分块
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LineError> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(line)) => keep_non_blank(&mut lines, line),
                Ok(None) => break,
                Err(e) => self.skip_or_fail(e)?,
            }
        }
        Ok(lines)
    }

    /// 输入结束：取出缓冲区剩余内容，并重置解码器
    pub fn finish(&mut self) -> Result<Option<String>, LineError> {
        let mut lines = Vec::new();
        loop {
            match self.codec.decode_eof(&mut self.buf) {
                Ok(Some(line)) => keep_non_blank(&mut lines, line),
                Ok(None) => break,
                Err(e) => {
                    if let Err(e) = self.skip_or_fail(e) {
                        self.reset();
                        return Err(e);
                    }
                }
            }
        }
        self.reset();
        Ok(lines.pop())
    }

    /// 缓冲区中尚未成行的字节数
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.codec = LinesCodec::new_with_max_length(self.codec.max_length());
    }

    /// 非法 UTF-8 的行已被消费，跳过即可；超长行是致命错误
    fn skip_or_fail(&self, e: LinesCodecError) -> Result<(), LineError> {
        match e {
            LinesCodecError::MaxLineLengthExceeded => Err(LineError::TooLong {
                limit: self.codec.max_length(),
            }),
            LinesCodecError::Io(e) => {
                tracing::warn!("跳过无法解码的行: {}", e);
                Ok(())
            }
        }
    }
}

fn keep_non_blank(lines: &mut Vec<String>, line: String) {
    if !line.trim().is_empty() {
        lines.push(line);
    }
}
