//! OCR 提示词
//!
//! 哨兵词说明直接取自 `Sentinel::ALL`，与清洗器共用同一张表

use crate::models::Sentinel;

/// 构建哨兵词说明列表
fn sentinel_rules() -> String {
    Sentinel::ALL
        .iter()
        .map(|s| format!("  - \"{}\": {}", s.as_str(), s.meaning()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 题目数量约束
fn count_rule(total_questions: Option<u32>) -> String {
    match total_questions {
        Some(total) => format!(
            "The sheet has exactly {total} questions. Output exactly {total} keys, \"Q1\" through \"Q{total}\", with no gaps and no extra keys. \
             If a question cannot be found, still output its key using the appropriate token below."
        ),
        None => "Number the questions \"Q1\", \"Q2\", ... in order with no gaps, exactly as they appear on the sheet."
            .to_string(),
    }
}

const ANSWER_RULES: &str = r#"Answer formatting:
  - Multiple choice: a single uppercase letter, e.g. "A".
  - True or false: exactly "TRUE" or "FALSE".
  - Identification or enumeration: the text as written, keeping its original casing.
  - Essay questions: "essay_answer"."#;

const OUTPUT_RULES: &str = "Return raw JSON only. The first character of your reply must be { and the last must be }. \
Do not wrap the JSON in Markdown code fences and do not add any commentary.";

/// 标准答案卷的提示词
pub fn build_answer_key_prompt(total_questions: Option<u32>) -> String {
    format!(
        r#"You are reading the answer key of a paper assessment. The image is a collage of every page, each labelled PAGE_<n> in its top-left corner; read the pages in order.

Extract the assessment UID printed on the sheet and the correct answer to every question.

{count}

{answers}

Reserved tokens (use them verbatim, in lowercase):
{sentinels}

Reply with this shape:
{{"assessment_uid": "<uid or missing_uid>", "answers": {{"Q1": "...", "Q2": "..."}}}}

{output}"#,
        count = count_rule(total_questions),
        answers = ANSWER_RULES,
        sentinels = sentinel_rules(),
        output = OUTPUT_RULES,
    )
}

/// 学生答题卡的提示词
pub fn build_student_prompt(total_questions: u32) -> String {
    format!(
        r#"You are reading a student's answer sheet. The image is a collage of every page, each labelled PAGE_<n> in its top-left corner; read the pages in order.

Transcribe the student's answer to every question. Do not correct or judge the answers.

{count}

{answers}

Reserved tokens (use them verbatim, in lowercase):
{sentinels}

Reply with this shape:
{{"Q1": "...", "Q2": "..."}}

{output}"#,
        count = count_rule(Some(total_questions)),
        answers = ANSWER_RULES,
        sentinels = sentinel_rules(),
        output = OUTPUT_RULES,
    )
}
