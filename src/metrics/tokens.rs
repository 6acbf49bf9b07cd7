//! Token 估算

use crate::ollama::ChatMessage;

/// 粗略估算 token 数：约 4 个字符一个 token，向上取整
///
/// 不是真正的分词器，输入和输出使用同一套规则
pub fn estimate_tokens(text: &str) -> i64 {
    text.chars().count().div_ceil(4) as i64
}

/// 估算一组消息的输入 token（按所有 content 直接拼接计算）
pub fn estimate_message_tokens(messages: &[ChatMessage]) -> i64 {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    chars.div_ceil(4) as i64
}
