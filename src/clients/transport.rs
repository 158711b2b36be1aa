//! OCR 传输抽象
//!
//! 两种传输方式实现同一个 `OcrTransport`，调用方无需关心底层差异

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, TransportError};

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// 先上传文件，再引用文件生成（SDK 风格会话）
    Files,
    /// 直接在请求体内嵌 base64 图片
    Inline,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Files => "files",
            TransportKind::Inline => "inline",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "files" | "sdk" => Ok(TransportKind::Files),
            "inline" | "http" => Ok(TransportKind::Inline),
            other => Err(format!("未知的传输方式: {}", other)),
        }
    }
}

/// OCR 传输能力
///
/// `send` 返回模型的原始文本，失败时返回已分类的 `TransportError`
pub trait OcrTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn send<'a>(
        &'a self,
        prompt: &'a str,
        image: &'a [u8],
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<String, TransportError>>;
}

/// 判断消息中是否出现独立的状态码，例如 `"HTTP 403 Forbidden"`
fn contains_code(message: &str, code: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == code)
}

/// 根据状态码与错误信息对失败分类
///
/// 顺序：鉴权 → 配额 → 请求错误 → 其余均可重试
pub fn classify_error(status: Option<u16>, message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();

    let auth = matches!(status, Some(401) | Some(403))
        || contains_code(&lower, "401")
        || contains_code(&lower, "403")
        || lower.contains("api key not valid")
        || lower.contains("invalid api key")
        || lower.contains("api_key_invalid")
        || lower.contains("permission_denied")
        || lower.contains("unauthenticated");
    if auth {
        return ErrorKind::Auth;
    }

    let quota = status == Some(429)
        || contains_code(&lower, "429")
        || lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("resource_exhausted")
        || lower.contains("resource exhausted");
    if quota {
        return ErrorKind::Quota;
    }

    let client = matches!(status, Some(400) | Some(404))
        || contains_code(&lower, "400")
        || contains_code(&lower, "404")
        || lower.contains("invalid_argument")
        || lower.contains("invalid argument")
        || lower.contains("malformed")
        || lower.contains("not_found");
    if client {
        return ErrorKind::Client;
    }

    ErrorKind::Retryable
}

/// 将 reqwest 错误转换为传输错误；超时与连接错误均可重试
pub(crate) fn classify_reqwest_error(transport: TransportKind, err: &reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() || err.is_connect() {
        ErrorKind::Retryable
    } else {
        classify_error(err.status().map(|s| s.as_u16()), &err.to_string())
    };
    TransportError::from_kind(kind, transport.as_str(), err.to_string())
}
