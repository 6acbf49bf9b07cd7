//! 流式帧解码
//!
//! Ollama 的 NDJSON 流按行增量解码，单行长度有上限

mod json_lines;
mod lines;

pub use json_lines::{Frame, JsonLineDecoder};
pub use lines::{DEFAULT_MAX_LINE_BYTES, LineError};
