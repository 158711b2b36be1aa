//! 模型输出清洗
//!
//! 去掉 Markdown 代码块、严格解析 JSON，并把答案规范化为固定格式

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::debug;

use crate::error::ParseError;
use crate::models::{AnswerMap, Sentinel};

/// 解析失败时保留的原始文本长度
const EXCERPT_CHARS: usize = 200;

/// 元数据键，不属于答案
const META_KEYS: [&str; 3] = ["assessment_uid", "student_id", "total_questions"];

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```$").expect("fence pattern is valid")
});

/// 清洗后的模型输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedResponse {
    pub answers: AnswerMap,
    pub assessment_uid: Option<String>,
    pub student_id: Option<String>,
    pub total_questions: Option<u32>,
}

/// 去掉包裹的 ```json / ``` 代码块并去除首尾空白
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match FENCED.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

fn excerpt(raw: &str) -> String {
    raw.chars().take(EXCERPT_CHARS).collect()
}

/// 规范化单个答案
///
/// - `true`/`t` → `TRUE`，`false`/`f` → `FALSE`（优先于单字母规则）
/// - 单个字母 → 大写
/// - 哨兵词 → 小写规范形式
/// - 其余字符串与非字符串值保持不变
pub fn normalize_answer(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(normalize_text(text)),
        other => other,
    }
}

fn normalize_text(text: String) -> String {
    let trimmed = text.trim();

    match trimmed.to_lowercase().as_str() {
        "true" | "t" => return "TRUE".to_string(),
        "false" | "f" => return "FALSE".to_string(),
        _ => {}
    }

    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_alphabetic() {
            return c.to_uppercase().collect();
        }
    }

    if let Some(sentinel) = Sentinel::parse(trimmed) {
        return sentinel.as_str().to_string();
    }

    text
}

fn as_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(cleaned).map_err(|source| ParseError::InvalidJson {
        excerpt: excerpt(raw),
        source,
    })?;

    match value {
        Value::Object(object) => Ok(object),
        _ => Err(ParseError::NotAnObject {
            excerpt: excerpt(raw),
        }),
    }
}

/// 解析并规范化模型输出
///
/// 同时接受扁平形式 `{"Q1": ...}` 与带 `answers` 的信封形式
pub fn sanitize_response(raw: &str) -> Result<SanitizedResponse, ParseError> {
    let mut object = parse_object(raw)?;

    let assessment_uid = object.get("assessment_uid").and_then(as_identifier);
    let student_id = object.get("student_id").and_then(as_identifier);
    let total_questions = object
        .get("total_questions")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());

    let answers = match object.remove("answers") {
        Some(Value::Object(inner)) => inner,
        Some(_) => {
            return Err(ParseError::NotAnObject {
                excerpt: excerpt(raw),
            })
        }
        None => {
            for key in META_KEYS {
                object.remove(key);
            }
            object
        }
    };

    let answers = AnswerMap::from(answers).map_values(normalize_answer);
    debug!("清洗完成，共 {} 个答案", answers.len());

    Ok(SanitizedResponse {
        answers,
        assessment_uid,
        student_id,
        total_questions,
    })
}

/// 只取答案映射
pub fn sanitize(raw: &str) -> Result<AnswerMap, ParseError> {
    sanitize_response(raw).map(|response| response.answers)
}
