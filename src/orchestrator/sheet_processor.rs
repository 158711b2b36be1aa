//! 单张答题卡处理器 - 编排层
//!
//! 调用 `GradingFlow` 处理一张答题卡并保存结果，把结果归类为统计项

use tracing::{error, info, warn};

use crate::error::{GradingError, Remediation};
use crate::infrastructure::{AnswerKeyStore, PersistOutcome, ResultStore};
use crate::models::{AnswerKeyRecord, ScanFolder, StudentResult};
use crate::workflow::{GradingCtx, GradingFlow};

/// 单张答题卡的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetOutcome {
    /// 已计分且为最终成绩
    Graded,
    /// 含问答题，需人工复核
    NeedsReview,
    /// 已有更新的扫描结果，本次未保存
    Superseded,
    /// 出现配置错误后未处理
    Skipped,
    Failed(Remediation),
}

impl SheetOutcome {
    fn from_result(result: &StudentResult, persisted: PersistOutcome) -> Self {
        match persisted {
            PersistOutcome::KeptNewer => SheetOutcome::Superseded,
            _ if result.is_final_score => SheetOutcome::Graded,
            _ => SheetOutcome::NeedsReview,
        }
    }
}

fn report_failure(ctx: &GradingCtx, err: &GradingError) -> SheetOutcome {
    let remediation = err.remediation();
    match remediation {
        Remediation::RetryLater => warn!("{} ⏳ OCR 服务不可用，请稍后重试: {}", ctx, err),
        Remediation::Rescan => warn!("{} 📷 输入无效，请重新扫描: {}", ctx, err),
        Remediation::FixConfig => error!("{} 🔑 配置错误，请检查 API 密钥: {}", ctx, err),
        Remediation::CheckStorage => error!("{} 💾 保存失败: {}", ctx, err),
    }
    SheetOutcome::Failed(remediation)
}

async fn persist(
    ctx: &GradingCtx,
    store: &dyn ResultStore,
    result: &StudentResult,
) -> Result<PersistOutcome, GradingError> {
    let persisted = store.persist_student_result(result).await?;
    if persisted == PersistOutcome::KeptNewer {
        info!("{} 已有更新的扫描结果，保留原记录", ctx);
    }
    Ok(persisted)
}

/// 处理一张学生答题卡
pub async fn process_student_sheet(
    flow: &GradingFlow,
    store: &dyn ResultStore,
    key: &AnswerKeyRecord,
    scan: &ScanFolder,
    sheet_index: usize,
) -> SheetOutcome {
    let ctx = GradingCtx::new(&scan.name, sheet_index);
    info!("{} 开始阅卷，共 {} 页", ctx, scan.pages.len());

    let graded = async {
        let result = flow
            .grade_sheet(&ctx, &scan.pages, key, scan.captured_at)
            .await?;
        let persisted = persist(&ctx, store, &result).await?;
        Ok::<_, GradingError>((result, persisted))
    }
    .await;

    match graded {
        Ok((result, persisted)) => {
            let outcome = SheetOutcome::from_result(&result, persisted);
            info!(
                "{} ✅ 得分 {}/{}{}",
                ctx,
                result.score,
                result.total_questions,
                if result.is_final_score { "" } else { "（待人工复核）" }
            );
            outcome
        }
        Err(err) => report_failure(&ctx, &err),
    }
}

/// 处理一张标准答案卷
pub async fn process_answer_key_sheet(
    flow: &GradingFlow,
    store: &dyn AnswerKeyStore,
    scan: &ScanFolder,
    uid_hint: Option<&str>,
    sheet_index: usize,
) -> SheetOutcome {
    let ctx = GradingCtx::new(&scan.name, sheet_index);
    info!("{} 开始识别标准答案，共 {} 页", ctx, scan.pages.len());

    let extracted = async {
        let record = flow.extract_answer_key(&ctx, &scan.pages, uid_hint).await?;
        store.save_answer_key(&record).await?;
        Ok::<_, GradingError>(record)
    }
    .await;

    match extracted {
        Ok(record) => {
            info!(
                "{} ✅ 答案 {} 已保存 ({} 题)",
                ctx, record.assessment_uid, record.total_questions
            );
            if record.has_essay() {
                SheetOutcome::NeedsReview
            } else {
                SheetOutcome::Graded
            }
        }
        Err(err) => report_failure(&ctx, &err),
    }
}

/// 按新答案重新计分一条已保存的成绩
pub async fn process_rescore(
    store: &dyn ResultStore,
    key: &AnswerKeyRecord,
    previous: &StudentResult,
    sheet_index: usize,
) -> SheetOutcome {
    let ctx = GradingCtx::new(&previous.student_id, sheet_index);
    let result = GradingFlow::rescore(previous, key);

    match persist(&ctx, store, &result).await {
        Ok(persisted) => {
            if result.score != previous.score {
                info!(
                    "{} 🔄 成绩更新: {} → {} / {}",
                    ctx, previous.score, result.score, result.total_questions
                );
            }
            SheetOutcome::from_result(&result, persisted)
        }
        Err(err) => report_failure(&ctx, &err),
    }
}
