//! JSON 文件存储 - 基础设施层
//!
//! 目录结构：
//! ```text
//! {store_dir}/answer_keys/{assessment_uid}.json
//! {store_dir}/results/{assessment_uid}/{student_id}.json
//! ```

use futures::future::BoxFuture;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{AnswerKeyRecord, StudentResult};

/// 标准答案的读写
pub trait AnswerKeyStore: Send + Sync {
    fn fetch_answer_key<'a>(
        &'a self,
        assessment_uid: &'a str,
    ) -> BoxFuture<'a, Result<AnswerKeyRecord, StoreError>>;

    fn save_answer_key<'a>(
        &'a self,
        record: &'a AnswerKeyRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// 保存成绩的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// 覆盖了较旧的记录
    Replaced,
    /// 已有记录更新，本次未写入
    KeptNewer,
}

/// 学生成绩的读写
pub trait ResultStore: Send + Sync {
    /// 同一学生同一考试只保留扫描时间最新的记录
    fn persist_student_result<'a>(
        &'a self,
        result: &'a StudentResult,
    ) -> BoxFuture<'a, Result<PersistOutcome, StoreError>>;

    fn list_student_results<'a>(
        &'a self,
        assessment_uid: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StudentResult>, StoreError>>;
}

/// 把标识符转换为安全的文件名
fn file_stem(id: &str) -> String {
    let stem: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}

/// 基于 JSON 文件的存储
pub struct JsonFileStore {
    root: PathBuf,
    /// 所有写入串行：不同标识符可能映射到同一文件名，成绩还需读-比较-写
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn answer_key_path(&self, assessment_uid: &str) -> PathBuf {
        self.root
            .join("answer_keys")
            .join(format!("{}.json", file_stem(assessment_uid)))
    }

    fn results_dir(&self, assessment_uid: &str) -> PathBuf {
        self.root.join("results").join(file_stem(assessment_uid))
    }

    fn result_path(&self, assessment_uid: &str, student_id: &str) -> PathBuf {
        self.results_dir(assessment_uid)
            .join(format!("{}.json", file_stem(student_id)))
    }

    /// 先写临时文件再改名，避免读到写了一半的文件
    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let display = path.display().to_string();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }

        let content =
            serde_json::to_string_pretty(value).map_err(|e| StoreError::json(&display, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::io(tmp.display().to_string(), e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(&display, e))?;
        Ok(())
    }

    /// 文件不存在时返回 `None`
    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        let display = path.display().to_string();
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(display, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::json(display, e))
    }
}

impl AnswerKeyStore for JsonFileStore {
    fn fetch_answer_key<'a>(
        &'a self,
        assessment_uid: &'a str,
    ) -> BoxFuture<'a, Result<AnswerKeyRecord, StoreError>> {
        Box::pin(async move {
            let path = self.answer_key_path(assessment_uid);
            debug!("读取答案: {}", path.display());
            Self::read_json(&path)
                .await?
                .ok_or_else(|| StoreError::AnswerKeyNotFound {
                    assessment_uid: assessment_uid.to_string(),
                })
        })
    }

    fn save_answer_key<'a>(
        &'a self,
        record: &'a AnswerKeyRecord,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.answer_key_path(&record.assessment_uid);
            Self::write_json(&path, record).await?;
            info!(
                "💾 答案已保存: {} ({} 题)",
                record.assessment_uid, record.total_questions
            );
            Ok(())
        })
    }
}

impl ResultStore for JsonFileStore {
    fn persist_student_result<'a>(
        &'a self,
        result: &'a StudentResult,
    ) -> BoxFuture<'a, Result<PersistOutcome, StoreError>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.result_path(&result.assessment_uid, &result.student_id);

            let existing: Option<StudentResult> = Self::read_json(&path).await?;
            let outcome = match existing {
                None => PersistOutcome::Inserted,
                Some(existing) if result.supersedes(&existing) => PersistOutcome::Replaced,
                Some(existing) => {
                    debug!(
                        "已有更新的成绩 ({} > {})，跳过写入: {}",
                        existing.captured_at,
                        result.captured_at,
                        path.display()
                    );
                    return Ok(PersistOutcome::KeptNewer);
                }
            };

            Self::write_json(&path, result).await?;
            debug!("成绩已保存 ({:?}): {}", outcome, path.display());
            Ok(outcome)
        })
    }

    fn list_student_results<'a>(
        &'a self,
        assessment_uid: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StudentResult>, StoreError>> {
        Box::pin(async move {
            let dir = self.results_dir(assessment_uid);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(StoreError::io(dir.display().to_string(), e)),
            };

            let mut paths = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(dir.display().to_string(), e))?
            {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    paths.push(path);
                }
            }
            paths.sort();

            let mut results = Vec::with_capacity(paths.len());
            for path in paths {
                if let Some(result) = Self::read_json(&path).await? {
                    results.push(result);
                }
            }
            Ok(results)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerMap, Breakdown};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn result(student_id: &str, score: u32, captured_at: chrono::DateTime<Utc>) -> StudentResult {
        StudentResult {
            student_id: student_id.to_string(),
            assessment_uid: "MATH-101".to_string(),
            answer_sheet: AnswerMap::new(),
            score,
            total_questions: 3,
            breakdown: Breakdown::new(),
            is_final_score: true,
            captured_at,
        }
    }

    #[tokio::test]
    async fn test_answer_key_roundtrip_and_missing() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let record = AnswerKeyRecord::new(
            "MATH-101",
            vec![("Q1", "A"), ("Q2", "TRUE")].into_iter().collect(),
        );

        store.save_answer_key(&record).await.unwrap();
        let loaded = store.fetch_answer_key("MATH-101").await.unwrap();
        assert_eq!(loaded, record);

        let err = store.fetch_answer_key("NOPE").await.unwrap_err();
        assert!(matches!(err, StoreError::AnswerKeyNotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_answer_keys_sharing_a_file_name() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(dir.path()));

        // "MATH/101" 与 "MATH_101" 落到同一个文件
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let uid = if i % 2 == 0 { "MATH/101" } else { "MATH_101" };
                tokio::spawn(async move {
                    let record =
                        AnswerKeyRecord::new(uid, vec![("Q1", "A")].into_iter().collect());
                    store.save_answer_key(&record).await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let saved = store.fetch_answer_key("MATH_101").await.unwrap();
        assert!(saved.assessment_uid == "MATH/101" || saved.assessment_uid == "MATH_101");
        assert!(!dir.path().join("answer_keys/MATH_101.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_latest_capture_wins() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let now = Utc::now();

        let first = result("2024-001", 1, now);
        assert_eq!(
            store.persist_student_result(&first).await.unwrap(),
            PersistOutcome::Inserted
        );

        let older = result("2024-001", 3, now - Duration::minutes(5));
        assert_eq!(
            store.persist_student_result(&older).await.unwrap(),
            PersistOutcome::KeptNewer
        );

        let newer = result("2024-001", 2, now + Duration::minutes(5));
        assert_eq!(
            store.persist_student_result(&newer).await.unwrap(),
            PersistOutcome::Replaced
        );

        let stored = store.list_student_results("MATH-101").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].score, 2);
    }

    #[tokio::test]
    async fn test_identifiers_are_sanitized_into_file_names() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());

        store
            .persist_student_result(&result("../escape", 1, Utc::now()))
            .await
            .unwrap();

        assert!(dir
            .path()
            .join("results/MATH-101/___escape.json")
            .exists());
    }

    #[tokio::test]
    async fn test_list_results_for_unknown_assessment_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.list_student_results("NONE").await.unwrap().is_empty());
    }
}
