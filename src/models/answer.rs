//! 答案映射与哨兵词表
//!
//! `AnswerMap` 以题号数值排序（Q2 在 Q10 之前），值保持 JSON 原样

use phf::phf_map;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 题号
///
/// `Q<n>` 形式的键解析为 `Numbered(n)`，其余原样保留并排在最后。
/// 带前导零的 `Q01` 不视为题号，避免与 `Q1` 合并
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QuestionKey {
    Numbered(u32),
    Other(String),
}

impl QuestionKey {
    pub fn number(&self) -> Option<u32> {
        match self {
            QuestionKey::Numbered(n) => Some(*n),
            QuestionKey::Other(_) => None,
        }
    }
}

impl From<u32> for QuestionKey {
    fn from(n: u32) -> Self {
        QuestionKey::Numbered(n)
    }
}

impl FromStr for QuestionKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = s
            .strip_prefix('Q')
            .filter(|digits| {
                !digits.starts_with('0') && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            })
            .and_then(|digits| digits.parse::<u32>().ok());

        Ok(match parsed {
            Some(n) => QuestionKey::Numbered(n),
            None => QuestionKey::Other(s.to_string()),
        })
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKey::Numbered(n) => write!(f, "Q{}", n),
            QuestionKey::Other(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for QuestionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuestionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(QuestionKey::from(raw))
    }
}

/// 哨兵词
///
/// 提示词与清洗器共用同一张表，避免两边词表漂移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    Unreadable,
    NoAnswer,
    NoQuestion,
    EssayAnswer,
    MissingUid,
    MissingAnswer,
    MissingQuestion,
}

static SENTINELS: phf::Map<&'static str, Sentinel> = phf_map! {
    "unreadable" => Sentinel::Unreadable,
    "no_answer" => Sentinel::NoAnswer,
    "no_question" => Sentinel::NoQuestion,
    "essay_answer" => Sentinel::EssayAnswer,
    "missing_uid" => Sentinel::MissingUid,
    "missing_answer" => Sentinel::MissingAnswer,
    "missing_question" => Sentinel::MissingQuestion,
};

impl Sentinel {
    pub const ALL: [Sentinel; 7] = [
        Sentinel::Unreadable,
        Sentinel::NoAnswer,
        Sentinel::NoQuestion,
        Sentinel::EssayAnswer,
        Sentinel::MissingUid,
        Sentinel::MissingAnswer,
        Sentinel::MissingQuestion,
    ];

    /// 规范（小写）形式
    pub fn as_str(self) -> &'static str {
        match self {
            Sentinel::Unreadable => "unreadable",
            Sentinel::NoAnswer => "no_answer",
            Sentinel::NoQuestion => "no_question",
            Sentinel::EssayAnswer => "essay_answer",
            Sentinel::MissingUid => "missing_uid",
            Sentinel::MissingAnswer => "missing_answer",
            Sentinel::MissingQuestion => "missing_question",
        }
    }

    /// 不区分大小写识别哨兵词
    pub fn parse(raw: &str) -> Option<Self> {
        SENTINELS.get(raw.trim().to_ascii_lowercase().as_str()).copied()
    }

    /// 提示词中对该哨兵词的说明
    pub fn meaning(self) -> &'static str {
        match self {
            Sentinel::Unreadable => "the answer is present but cannot be read",
            Sentinel::NoAnswer => "the student left the answer blank",
            Sentinel::NoQuestion => "the question number does not exist on the sheet",
            Sentinel::EssayAnswer => "the question expects an essay that needs manual checking",
            Sentinel::MissingUid => "the assessment UID is not visible on the sheet",
            Sentinel::MissingAnswer => "no answer could be found for the question",
            Sentinel::MissingQuestion => "the question itself is missing from the scan",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 题号到答案的有序映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerMap {
    entries: BTreeMap<QuestionKey, Value>,
}

/// 题号连续性检查结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContiguityReport {
    /// `Q1..Qtotal` 中缺失的题号
    pub missing: Vec<u32>,
    /// 超出范围或格式不符的键
    pub unexpected: Vec<String>,
}

impl ContiguityReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl AnswerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<QuestionKey>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &QuestionKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// 取字符串答案
    pub fn get_str(&self, key: &QuestionKey) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuestionKey, &Value)> {
        self.entries.iter()
    }

    /// 对每个值做变换，键保持不变
    pub fn map_values(self, mut f: impl FnMut(Value) -> Value) -> Self {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(key, value)| (key, f(value)))
                .collect(),
        }
    }

    /// 检查键集合是否恰好为 `Q1..Qtotal`
    pub fn validate_contiguous(&self, total: u32) -> ContiguityReport {
        let mut report = ContiguityReport::default();

        for n in 1..=total {
            if !self.entries.contains_key(&QuestionKey::Numbered(n)) {
                report.missing.push(n);
            }
        }

        for key in self.entries.keys() {
            match key {
                QuestionKey::Numbered(n) if *n <= total => {}
                other => report.unexpected.push(other.to_string()),
            }
        }

        report
    }
}

impl<K: Into<QuestionKey>, V: Into<Value>> FromIterator<(K, V)> for AnswerMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl From<&str> for QuestionKey {
    fn from(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| QuestionKey::Other(raw.to_string()))
    }
}

impl From<String> for QuestionKey {
    fn from(raw: String) -> Self {
        QuestionKey::from(raw.as_str())
    }
}

impl From<serde_json::Map<String, Value>> for AnswerMap {
    fn from(object: serde_json::Map<String, Value>) -> Self {
        object.into_iter().collect()
    }
}

impl Serialize for AnswerMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AnswerMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        Ok(AnswerMap::from(object))
    }
}
