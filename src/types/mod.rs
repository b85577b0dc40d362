//! 类型系统模块：聊天补全请求/响应与令牌用量。
//!
//! # Types Module
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Chat message with role and text content |
//! | [`ChatCompletionRequest`] | Body posted to `/chat/completions` |
//! | [`ChatCompletion`] | Parsed provider response |
//! | [`TokenUsage`] | Best-effort token counts extracted from a response |

pub mod completion;
pub mod message;

pub use completion::{
    ChatCompletion, ChatCompletionRequest, Choice, ChoiceMessage, TokenUsage, UsageCounts,
    UsageReport, DEFAULT_TEMPERATURE,
};
pub use message::{Message, MessageRole};
