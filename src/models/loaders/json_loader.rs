use crate::models::record::AnswerKeyRecord;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// 从 JSON 文件加载标准答案
pub async fn load_answer_key(json_file_path: &Path) -> Result<AnswerKeyRecord> {
    let content = fs::read_to_string(json_file_path)
        .await
        .with_context(|| format!("无法读取答案文件: {}", json_file_path.display()))?;

    let record: AnswerKeyRecord = serde_json::from_str(&content)
        .with_context(|| format!("无法解析答案文件: {}", json_file_path.display()))?;

    Ok(record)
}
