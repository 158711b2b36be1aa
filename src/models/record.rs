use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::answer::{AnswerMap, QuestionKey};

/// 标准答案记录
///
/// 交换格式为 `{"assessment_uid": ..., "answers": {...}}`，
/// `total_questions` 缺省时取答案数量
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerKeyRecord {
    pub assessment_uid: String,
    #[serde(rename = "answers")]
    pub answer_key: AnswerMap,
    pub total_questions: u32,
}

#[derive(Deserialize)]
struct RawAnswerKey {
    assessment_uid: String,
    answers: AnswerMap,
    #[serde(default)]
    total_questions: Option<u32>,
}

impl<'de> Deserialize<'de> for AnswerKeyRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawAnswerKey::deserialize(deserializer)?;
        let total_questions = raw
            .total_questions
            .unwrap_or(raw.answers.len() as u32);
        Ok(Self {
            assessment_uid: raw.assessment_uid,
            answer_key: raw.answers,
            total_questions,
        })
    }
}

impl AnswerKeyRecord {
    /// 题目数取答案数量
    pub fn new(assessment_uid: impl Into<String>, answer_key: AnswerMap) -> Self {
        let total_questions = answer_key.len() as u32;
        Self {
            assessment_uid: assessment_uid.into(),
            answer_key,
            total_questions,
        }
    }

    /// 显式声明题目数（允许与答案数量不一致）
    pub fn with_total(
        assessment_uid: impl Into<String>,
        answer_key: AnswerMap,
        total_questions: u32,
    ) -> Self {
        Self {
            assessment_uid: assessment_uid.into(),
            answer_key,
            total_questions,
        }
    }

    /// 是否包含需要人工批改的题目
    pub fn has_essay(&self) -> bool {
        self.answer_key
            .iter()
            .any(|(_, value)| value.as_str() == Some(super::Sentinel::EssayAnswer.as_str()))
    }
}

/// 学生答题卡
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSheet {
    pub student_id: String,
    pub answers: AnswerMap,
}

/// 判题结果：布尔值，或问答题的 `"pending"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckingResult {
    Checked(bool),
    Pending,
}

impl CheckingResult {
    pub fn is_correct(self) -> bool {
        matches!(self, CheckingResult::Checked(true))
    }
}

impl Serialize for CheckingResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CheckingResult::Checked(value) => serializer.serialize_bool(*value),
            CheckingResult::Pending => serializer.serialize_str("pending"),
        }
    }
}

impl<'de> Deserialize<'de> for CheckingResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CheckingVisitor;

        impl<'de> Visitor<'de> for CheckingVisitor {
            type Value = CheckingResult;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a boolean or the string \"pending\"")
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
                Ok(CheckingResult::Checked(value))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                if value == "pending" {
                    Ok(CheckingResult::Pending)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(value), &self))
                }
            }
        }

        deserializer.deserialize_any(CheckingVisitor)
    }
}

/// 单题判分明细
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub student_answer: Value,
    pub correct_answer: Value,
    pub checking_result: CheckingResult,
}

pub type Breakdown = BTreeMap<QuestionKey, BreakdownEntry>;

/// 学生成绩记录
///
/// 同一 `(student_id, assessment_uid)` 以扫描时间最新者为准
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentResult {
    pub student_id: String,
    pub assessment_uid: String,
    pub answer_sheet: AnswerMap,
    pub score: u32,
    pub total_questions: u32,
    pub breakdown: Breakdown,
    pub is_final_score: bool,
    pub captured_at: DateTime<Utc>,
}

impl StudentResult {
    /// 是否应覆盖已有记录
    pub fn supersedes(&self, existing: &StudentResult) -> bool {
        self.captured_at >= existing.captured_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_key_total_defaults_to_map_size() {
        let record: AnswerKeyRecord = serde_json::from_value(json!({
            "assessment_uid": "MATH-101",
            "answers": {"Q1": "A", "Q2": "TRUE"}
        }))
        .unwrap();

        assert_eq!(record.total_questions, 2);
        assert_eq!(record.answer_key.len(), 2);
    }

    #[test]
    fn test_answer_key_keeps_declared_total() {
        let record: AnswerKeyRecord = serde_json::from_value(json!({
            "assessment_uid": "MATH-101",
            "answers": {"Q1": "A"},
            "total_questions": 10
        }))
        .unwrap();

        assert_eq!(record.total_questions, 10);
    }

    #[test]
    fn test_checking_result_wire_format() {
        let entry = BreakdownEntry {
            student_answer: json!("no_answer"),
            correct_answer: json!("essay_answer"),
            checking_result: CheckingResult::Pending,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["checking_result"], json!("pending"));

        let parsed: CheckingResult = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(parsed, CheckingResult::Checked(true));
        assert!(serde_json::from_value::<CheckingResult>(json!("maybe")).is_err());
    }
}
