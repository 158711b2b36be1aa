//! 阅卷流程 - 流程层
//!
//! 核心职责：定义"一张答题卡"的完整处理流程
//!
//! 流程顺序：
//! 1. 读取页面 → 智能拼图 → JPEG 编码（阻塞线程）
//! 2. OCR 请求（重试 + 熔断）
//! 3. 清洗模型输出
//! 4. 判分，生成成绩记录
//!
//! 三类失败分别映射到 `GradingError` 的不同分支，调用方据此给出不同提示

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GradingError, InputError};
use crate::infrastructure::{prepare_ocr_image, CollageOptions};
use crate::models::{AnswerKeyRecord, AnswerMap, Sentinel, StudentResult, StudentSheet};
use crate::services::{
    build_answer_key_prompt, build_student_prompt, sanitize_response, score, ImageSource,
    OcrOutcome, OcrService, SanitizedResponse,
};
use crate::utils::logging::truncate_text;
use crate::workflow::grading_ctx::GradingCtx;

/// 阅卷流程
///
/// - 不持有存储，只产出记录
/// - 与其他流程共享同一个 `OcrService`（即共享熔断器）
pub struct GradingFlow {
    ocr: Arc<OcrService>,
    collage: CollageOptions,
    verbose_logging: bool,
    /// 答案卷已知的题目数
    expected_questions: Option<u32>,
}

impl GradingFlow {
    pub fn new(ocr: Arc<OcrService>, config: &Config) -> Self {
        Self {
            ocr,
            collage: CollageOptions::from_config(config),
            verbose_logging: config.verbose_logging,
            expected_questions: config.answer_key_questions,
        }
    }

    pub fn with_options(ocr: Arc<OcrService>, collage: CollageOptions) -> Self {
        Self {
            ocr,
            collage,
            verbose_logging: false,
            expected_questions: None,
        }
    }

    pub fn with_expected_questions(mut self, total: Option<u32>) -> Self {
        self.expected_questions = total;
        self
    }

    /// 拼图与编码是 CPU 密集操作，放到阻塞线程执行
    async fn prepare_image(
        &self,
        ctx: &GradingCtx,
        pages: &[PathBuf],
    ) -> Result<ImageSource, GradingError> {
        let pages = pages.to_vec();
        let options = self.collage;

        let encoded = tokio::task::spawn_blocking(move || prepare_ocr_image(&pages, &options))
            .await
            .map_err(|e| InputError::TaskFailed(e.to_string()))??;

        info!(
            "{} 🖼️ 拼图完成: {} 页, {} KB",
            ctx,
            encoded.page_count,
            encoded.bytes.len() / 1024
        );

        Ok(ImageSource::Encoded {
            bytes: encoded.bytes,
            mime_type: encoded.mime_type.to_string(),
        })
    }

    async fn request_answers(
        &self,
        ctx: &GradingCtx,
        prompt: &str,
        image: &ImageSource,
    ) -> Result<SanitizedResponse, GradingError> {
        match self.ocr.request(prompt, image).await? {
            OcrOutcome::Success {
                text,
                transport,
                attempt,
            } => {
                if self.verbose_logging {
                    debug!(
                        "{} 模型原始输出 ({}, 第 {} 次): {}",
                        ctx,
                        transport,
                        attempt,
                        truncate_text(&text, 300)
                    );
                }
                sanitize_response(&text).map_err(|e| {
                    warn!("{} ❌ 模型输出无法解析: {}", ctx, e);
                    GradingError::from(e)
                })
            }
            OcrOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let reason = match last_error {
                    Some(err) => format!("已尝试 {} 次，最后错误: {}", attempts, err),
                    None => format!("已尝试 {} 次，没有可用的传输方式", attempts),
                };
                Err(GradingError::OcrUnavailable(reason))
            }
            OcrOutcome::Fatal(err) => Err(GradingError::Config(err)),
        }
    }

    fn warn_on_gaps(ctx: &GradingCtx, answers: &AnswerMap, total: u32) {
        let report = answers.validate_contiguous(total);
        if !report.is_clean() {
            warn!(
                "{} ⚠️ 模型输出题号不符合约定: 缺失 {:?}, 多余 {:?}",
                ctx, report.missing, report.unexpected
            );
        }
    }

    /// 学生答题卡：扫描 → 识别 → 判分
    ///
    /// `captured_at` 为扫描时间，决定同一学生多次扫描时保留哪一条
    pub async fn grade_sheet(
        &self,
        ctx: &GradingCtx,
        pages: &[PathBuf],
        key: &AnswerKeyRecord,
        captured_at: DateTime<Utc>,
    ) -> Result<StudentResult, GradingError> {
        let image = self.prepare_image(ctx, pages).await?;
        let prompt = build_student_prompt(key.total_questions);
        let response = self.request_answers(ctx, &prompt, &image).await?;

        if let Some(uid) = &response.assessment_uid {
            if uid != &key.assessment_uid {
                warn!(
                    "{} ⚠️ 答题卡上的考试编号 {} 与当前考试 {} 不一致",
                    ctx, uid, key.assessment_uid
                );
            }
        }
        Self::warn_on_gaps(ctx, &response.answers, key.total_questions);

        let sheet = StudentSheet {
            student_id: ctx.sheet_id.clone(),
            answers: response.answers,
        };
        Ok(score_sheet(sheet, key, captured_at))
    }

    /// 标准答案卷：扫描 → 识别，生成答案记录
    ///
    /// 考试编号优先取 `uid_hint`，其次取模型识别结果，最后退回文件夹名；
    /// 题目数优先取配置的已知值
    pub async fn extract_answer_key(
        &self,
        ctx: &GradingCtx,
        pages: &[PathBuf],
        uid_hint: Option<&str>,
    ) -> Result<AnswerKeyRecord, GradingError> {
        let image = self.prepare_image(ctx, pages).await?;
        let prompt = build_answer_key_prompt(self.expected_questions);
        let response = self.request_answers(ctx, &prompt, &image).await?;

        let recognized = response
            .assessment_uid
            .filter(|uid| Sentinel::parse(uid) != Some(Sentinel::MissingUid));
        let assessment_uid = uid_hint
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .map(str::to_string)
            .or(recognized)
            .unwrap_or_else(|| {
                warn!("{} ⚠️ 未识别到考试编号，使用文件夹名", ctx);
                ctx.sheet_id.clone()
            });

        let total_questions = self
            .expected_questions
            .or(response.total_questions)
            .unwrap_or(response.answers.len() as u32);
        let record = AnswerKeyRecord::with_total(assessment_uid, response.answers, total_questions);

        if record.answer_key.is_empty() {
            warn!("{} ⚠️ 未识别到任何答案", ctx);
        }
        Self::warn_on_gaps(ctx, &record.answer_key, record.total_questions);
        if record.has_essay() {
            info!("{} 📝 答案包含问答题，相关成绩需人工复核", ctx);
        }

        Ok(record)
    }

    /// 用新的答案重新计算已有成绩，保留原扫描时间
    pub fn rescore(previous: &StudentResult, key: &AnswerKeyRecord) -> StudentResult {
        let sheet = StudentSheet {
            student_id: previous.student_id.clone(),
            answers: previous.answer_sheet.clone(),
        };
        score_sheet(sheet, key, previous.captured_at)
    }
}

/// 判分并组装成绩记录
pub fn score_sheet(
    sheet: StudentSheet,
    key: &AnswerKeyRecord,
    captured_at: DateTime<Utc>,
) -> StudentResult {
    let report = score(&sheet.answers, key);
    if let Some(warning) = report.mismatch_warning() {
        warn!("⚠️ 答案 {}: {}", key.assessment_uid, warning);
    }

    StudentResult {
        student_id: sheet.student_id,
        assessment_uid: key.assessment_uid.clone(),
        answer_sheet: sheet.answers,
        score: report.score,
        total_questions: report.total,
        breakdown: report.breakdown,
        is_final_score: report.is_final,
        captured_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{OcrTransport, TransportKind};
    use crate::error::{ErrorKind, Remediation, TransportError};
    use crate::models::{CheckingResult, QuestionKey};
    use crate::services::{BreakerSettings, RetryPolicy, TransportSlot};
    use futures::future::BoxFuture;
    use image::{Rgb, RgbImage};
    use std::time::Duration;
    use tempfile::TempDir;

    /// 每次返回相同结果的假传输
    struct FixedTransport(Result<String, TransportError>);

    impl OcrTransport for FixedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Inline
        }

        fn send<'a>(
            &'a self,
            _prompt: &'a str,
            _image: &'a [u8],
            _mime_type: &'a str,
        ) -> BoxFuture<'a, Result<String, TransportError>> {
            let result = self.0.clone();
            Box::pin(async move { result })
        }
    }

    fn flow(result: Result<String, TransportError>) -> GradingFlow {
        let transport: Arc<dyn OcrTransport> = Arc::new(FixedTransport(result));
        let ocr = OcrService::new(
            vec![TransportSlot::new(transport, BreakerSettings::default())],
            RetryPolicy {
                max_attempts: 2,
                exponential_backoff: false,
                backoff_base: Duration::ZERO,
                retry_interval: Duration::ZERO,
            },
        );
        GradingFlow::with_options(
            Arc::new(ocr),
            CollageOptions {
                tile_width: 40,
                gutter: 2,
                jpeg_quality: 60,
            },
        )
    }

    fn pages(dir: &TempDir, count: usize) -> Vec<PathBuf> {
        (1..=count)
            .map(|n| {
                let path = dir.path().join(format!("page_{}.png", n));
                RgbImage::from_pixel(30, 42, Rgb([250, 250, 250]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect()
    }

    fn key() -> AnswerKeyRecord {
        AnswerKeyRecord::new(
            "MATH-101",
            vec![("Q1", "A"), ("Q2", "TRUE"), ("Q3", "essay_answer")]
                .into_iter()
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_grade_sheet_scores_sanitized_answers() {
        let dir = TempDir::new().unwrap();
        let flow = flow(Ok("```json\n{\"Q1\": \"a\", \"Q2\": \"f\", \"Q3\": \"Plants\"}\n```".into()));
        let ctx = GradingCtx::new("2024-001", 1);

        let result = flow
            .grade_sheet(&ctx, &pages(&dir, 2), &key(), Utc::now())
            .await
            .unwrap();

        assert_eq!(result.student_id, "2024-001");
        assert_eq!(result.assessment_uid, "MATH-101");
        assert_eq!(result.score, 1);
        assert_eq!(result.total_questions, 3);
        assert!(!result.is_final_score);
        assert_eq!(
            result.breakdown[&QuestionKey::Numbered(3)].checking_result,
            CheckingResult::Pending
        );
    }

    #[tokio::test]
    async fn test_result_keeps_scan_time_of_folder() {
        let dir = TempDir::new().unwrap();
        let page = pages(&dir, 1).remove(0);
        let scanned = std::time::SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
        std::fs::File::options()
            .write(true)
            .open(&page)
            .unwrap()
            .set_modified(scanned)
            .unwrap();

        let scan = crate::models::load_scan_folder(dir.path()).await.unwrap();
        let ctx = GradingCtx::new("2024-001", 1);
        let result = flow(Ok(r#"{"Q1": "A"}"#.into()))
            .grade_sheet(&ctx, &scan.pages, &key(), scan.captured_at)
            .await
            .unwrap();

        assert_eq!(result.captured_at, scan.captured_at);
        let drift = result.captured_at - DateTime::<Utc>::from(scanned);
        assert!(drift.num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn test_outcomes_map_to_distinct_remediations() {
        let dir = TempDir::new().unwrap();
        let ctx = GradingCtx::new("2024-002", 1);
        let pages = pages(&dir, 1);

        let down = flow(Err(TransportError::from_kind(ErrorKind::Retryable, "inline", "503")))
            .grade_sheet(&ctx, &pages, &key(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(down.remediation(), Remediation::RetryLater);

        let auth = flow(Err(TransportError::from_kind(ErrorKind::Auth, "inline", "401")))
            .grade_sheet(&ctx, &pages, &key(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(auth.remediation(), Remediation::FixConfig);

        let garbage = flow(Ok("I could not read the sheet, sorry.".into()))
            .grade_sheet(&ctx, &pages, &key(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(garbage.remediation(), Remediation::Rescan);
    }

    #[tokio::test]
    async fn test_sheet_without_readable_pages_is_bad_input() {
        let dir = TempDir::new().unwrap();
        let ctx = GradingCtx::new("2024-003", 1);
        let missing = vec![dir.path().join("gone.jpg")];

        let err = flow(Ok("{}".into()))
            .grade_sheet(&ctx, &missing, &key(), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, GradingError::BadInput(_)));
    }

    #[tokio::test]
    async fn test_extract_answer_key_uses_recognized_uid() {
        let dir = TempDir::new().unwrap();
        let ctx = GradingCtx::new("key-folder", 1);
        let flow = flow(Ok(
            r#"{"assessment_uid": "SCI-7", "answers": {"Q1": "b", "Q2": "True"}}"#.into(),
        ));

        let record = flow
            .extract_answer_key(&ctx, &pages(&dir, 1), None)
            .await
            .unwrap();
        assert_eq!(record.assessment_uid, "SCI-7");
        assert_eq!(record.total_questions, 2);
        assert_eq!(record.answer_key.get_str(&QuestionKey::Numbered(2)), Some("TRUE"));

        let hinted = flow
            .extract_answer_key(&ctx, &pages(&dir, 1), Some("SCI-8"))
            .await
            .unwrap();
        assert_eq!(hinted.assessment_uid, "SCI-8");
    }

    /// 记录提示词的假传输
    struct PromptRecorder {
        reply: String,
        prompts: parking_lot::Mutex<Vec<String>>,
    }

    impl OcrTransport for PromptRecorder {
        fn kind(&self) -> TransportKind {
            TransportKind::Inline
        }

        fn send<'a>(
            &'a self,
            prompt: &'a str,
            _image: &'a [u8],
            _mime_type: &'a str,
        ) -> BoxFuture<'a, Result<String, TransportError>> {
            self.prompts.lock().push(prompt.to_string());
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    #[tokio::test]
    async fn test_known_question_count_reaches_prompt_and_record() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(PromptRecorder {
            reply: r#"{"assessment_uid": "SCI-7", "answers": {"Q1": "B", "Q2": "C"}}"#.to_string(),
            prompts: parking_lot::Mutex::new(Vec::new()),
        });
        let transport: Arc<dyn OcrTransport> = recorder.clone();
        let ocr = OcrService::new(
            vec![TransportSlot::new(transport, BreakerSettings::default())],
            RetryPolicy::default(),
        );
        let flow = GradingFlow::with_options(
            Arc::new(ocr),
            CollageOptions {
                tile_width: 40,
                gutter: 2,
                jpeg_quality: 60,
            },
        )
        .with_expected_questions(Some(3));

        let record = flow
            .extract_answer_key(&GradingCtx::new("key", 1), &pages(&dir, 1), None)
            .await
            .unwrap();

        assert_eq!(record.total_questions, 3);
        assert_eq!(record.answer_key.len(), 2);
        let prompts = recorder.prompts.lock();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("exactly 3 questions"));
    }

    #[tokio::test]
    async fn test_extract_answer_key_falls_back_to_folder_name() {
        let dir = TempDir::new().unwrap();
        let ctx = GradingCtx::new("key-folder", 1);
        let flow = flow(Ok(
            r#"{"assessment_uid": "MISSING_UID", "answers": {"Q1": "c"}}"#.into(),
        ));

        let record = flow
            .extract_answer_key(&ctx, &pages(&dir, 1), None)
            .await
            .unwrap();
        assert_eq!(record.assessment_uid, "key-folder");
    }

    #[test]
    fn test_rescore_keeps_capture_time() {
        let old_key = AnswerKeyRecord::new("MATH-101", vec![("Q1", "A")].into_iter().collect());
        let sheet = StudentSheet {
            student_id: "2024-004".to_string(),
            answers: vec![("Q1", "B")].into_iter().collect(),
        };
        let captured_at = Utc::now();
        let previous = score_sheet(sheet, &old_key, captured_at);
        assert_eq!(previous.score, 0);

        let fixed_key = AnswerKeyRecord::new("MATH-101", vec![("Q1", "B")].into_iter().collect());
        let rescored = GradingFlow::rescore(&previous, &fixed_key);

        assert_eq!(rescored.score, 1);
        assert_eq!(rescored.captured_at, captured_at);
    }
}
