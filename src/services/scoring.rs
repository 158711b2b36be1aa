//! 判分引擎
//!
//! 纯函数：相同输入总得到相同结果，无 I/O

use serde_json::Value;

use crate::error::DataInvariantWarning;
use crate::models::{AnswerKeyRecord, AnswerMap, Breakdown, BreakdownEntry, CheckingResult, Sentinel};

/// 判分结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub score: u32,
    /// 取自答案记录声明的题目数
    pub total: u32,
    pub breakdown: Breakdown,
    /// 含问答题时为 false，需人工复核
    pub is_final: bool,
    pub had_mismatch_warning: bool,
    /// 答案记录中实际的答案数量
    pub key_entries: usize,
}

impl ScoreReport {
    pub fn mismatch_warning(&self) -> Option<DataInvariantWarning> {
        self.had_mismatch_warning.then_some(DataInvariantWarning {
            declared_total: self.total,
            actual_entries: self.key_entries,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.breakdown
            .values()
            .filter(|entry| entry.checking_result == CheckingResult::Pending)
            .count()
    }
}

/// 按标准答案逐题比对
///
/// 遍历的是答案记录的题目而非学生的，学生缺答的题按 `missing_answer` 比较
pub fn score(student: &AnswerMap, key: &AnswerKeyRecord) -> ScoreReport {
    let missing = Value::String(Sentinel::MissingAnswer.as_str().to_string());
    let essay = Sentinel::EssayAnswer.as_str();

    let mut breakdown = Breakdown::new();
    let mut score = 0;
    let mut is_final = true;

    for (question, correct) in key.answer_key.iter() {
        let student_answer = student.get(question).unwrap_or(&missing);

        let checking_result = if correct.as_str() == Some(essay) {
            is_final = false;
            CheckingResult::Pending
        } else {
            CheckingResult::Checked(student_answer == correct)
        };

        if checking_result.is_correct() {
            score += 1;
        }

        breakdown.insert(
            question.clone(),
            BreakdownEntry {
                student_answer: student_answer.clone(),
                correct_answer: correct.clone(),
                checking_result,
            },
        );
    }

    let key_entries = key.answer_key.len();
    ScoreReport {
        score,
        total: key.total_questions,
        breakdown,
        is_final,
        had_mismatch_warning: key.total_questions as usize != key_entries,
        key_entries,
    }
}
