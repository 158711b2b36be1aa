//! 批量阅卷处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量答题卡的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建 OCR 服务（传输 + 熔断器）、存储，导入答案文件
//! 2. **批量加载**：扫描目录下每个子文件夹为一张答题卡
//! 3. **并发控制**：使用 Semaphore 限制同时处理的答题卡数量
//! 4. **全局统计**：按失败原因分类汇总
//!
//! 熔断器在所有答题卡之间共享；出现配置错误后不再处理剩余答题卡

use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::{Config, GradingMode};
use crate::error::Remediation;
use crate::infrastructure::{AnswerKeyStore, JsonFileStore, ResultStore};
use crate::models::{load_all_scan_folders, load_answer_key, AnswerKeyRecord, ScanFolder};
use crate::orchestrator::sheet_processor::{
    process_answer_key_sheet, process_rescore, process_student_sheet, SheetOutcome,
};
use crate::services::OcrService;
use crate::utils::logging::{log_sheets_loaded, log_startup};
use crate::workflow::GradingFlow;

/// 应用主结构
pub struct App {
    config: Config,
    flow: Arc<GradingFlow>,
    store: Arc<JsonFileStore>,
}

/// 处理统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub total: usize,
    pub graded: usize,
    pub needs_review: usize,
    pub superseded: usize,
    pub skipped: usize,
    /// OCR 不可用
    pub retry_later: usize,
    /// 扫描件或模型输出无效
    pub rescan: usize,
    pub config_errors: usize,
    pub storage_errors: usize,
    /// 任务异常退出
    pub task_errors: usize,
}

impl ProcessingStats {
    pub fn record(&mut self, outcome: SheetOutcome) {
        match outcome {
            SheetOutcome::Graded => self.graded += 1,
            SheetOutcome::NeedsReview => self.needs_review += 1,
            SheetOutcome::Superseded => self.superseded += 1,
            SheetOutcome::Skipped => self.skipped += 1,
            SheetOutcome::Failed(Remediation::RetryLater) => self.retry_later += 1,
            SheetOutcome::Failed(Remediation::Rescan) => self.rescan += 1,
            SheetOutcome::Failed(Remediation::FixConfig) => self.config_errors += 1,
            SheetOutcome::Failed(Remediation::CheckStorage) => self.storage_errors += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.retry_later + self.rescan + self.config_errors + self.storage_errors + self.task_errors
    }
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let ocr = OcrService::from_config(&config).context("创建 Gemini 客户端失败")?;
        let store = JsonFileStore::new(&config.store_dir);

        let app = Self::with_components(config, ocr, store);
        app.import_answer_key().await?;
        Ok(app)
    }

    /// 使用现成的组件组装应用
    pub fn with_components(config: Config, ocr: OcrService, store: JsonFileStore) -> Self {
        let flow = GradingFlow::new(Arc::new(ocr), &config);
        Self {
            config,
            flow: Arc::new(flow),
            store: Arc::new(store),
        }
    }

    /// 导入 `answer_key_file` 指定的答案
    pub async fn import_answer_key(&self) -> Result<()> {
        let Some(path) = &self.config.answer_key_file else {
            return Ok(());
        };

        let record = load_answer_key(Path::new(path)).await?;
        self.store
            .save_answer_key(&record)
            .await
            .context("保存导入的答案失败")?;
        info!(
            "📥 已导入答案 {} ({} 题)",
            record.assessment_uid, record.total_questions
        );
        Ok(())
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<ProcessingStats> {
        let stats = match self.config.grading_mode {
            GradingMode::Student => self.run_student().await?,
            GradingMode::AnswerKey => self.run_answer_key().await?,
            GradingMode::Rescore => self.run_rescore().await?,
        };

        print_final_stats(&stats);
        Ok(stats)
    }

    async fn fetch_key(&self) -> Result<Arc<AnswerKeyRecord>> {
        let uid = &self.config.assessment_uid;
        let key = self
            .store
            .fetch_answer_key(uid)
            .await
            .with_context(|| format!("无法加载考试 {} 的答案", uid))?;
        info!(
            "✓ 已加载答案 {} ({} 题)",
            key.assessment_uid, key.total_questions
        );
        Ok(Arc::new(key))
    }

    async fn load_scans(&self) -> Result<Vec<ScanFolder>> {
        info!("\n📁 正在扫描答题卡目录: {}", self.config.scan_dir);
        load_all_scan_folders(&self.config.scan_dir).await
    }

    async fn run_student(&self) -> Result<ProcessingStats> {
        let key = self.fetch_key().await?;
        let scans = self.load_scans().await?;
        if scans.is_empty() {
            warn!("⚠️ 没有找到待处理的答题卡，程序结束");
            return Ok(ProcessingStats::default());
        }
        log_sheets_loaded(scans.len(), self.config.max_concurrent_sheets);

        let flow = self.flow.clone();
        let store = self.store.clone();
        self.run_all(scans, move |scan, index| {
            let flow = flow.clone();
            let store = store.clone();
            let key = key.clone();
            async move { process_student_sheet(&flow, &*store, &key, &scan, index).await }
        })
        .await
    }

    async fn run_answer_key(&self) -> Result<ProcessingStats> {
        let scans = self.load_scans().await?;
        if scans.is_empty() {
            warn!("⚠️ 没有找到答案卷，程序结束");
            return Ok(ProcessingStats::default());
        }
        log_sheets_loaded(scans.len(), self.config.max_concurrent_sheets);

        // 多个文件夹时每个文件夹各自识别考试编号
        let configured = self.config.assessment_uid.trim();
        let uid_hint = if configured.is_empty() {
            None
        } else if scans.len() == 1 {
            Some(configured.to_string())
        } else {
            warn!("⚠️ 找到 {} 份答案卷，忽略配置的考试编号 {}", scans.len(), configured);
            None
        };

        let flow = self.flow.clone();
        let store = self.store.clone();
        self.run_all(scans, move |scan, index| {
            let flow = flow.clone();
            let store = store.clone();
            let uid_hint = uid_hint.clone();
            async move {
                process_answer_key_sheet(&flow, &*store, &scan, uid_hint.as_deref(), index).await
            }
        })
        .await
    }

    async fn run_rescore(&self) -> Result<ProcessingStats> {
        let key = self.fetch_key().await?;
        let previous = self
            .store
            .list_student_results(&key.assessment_uid)
            .await
            .context("读取已保存的成绩失败")?;
        if previous.is_empty() {
            warn!("⚠️ 考试 {} 没有已保存的成绩", key.assessment_uid);
            return Ok(ProcessingStats::default());
        }
        info!("✓ 找到 {} 条已保存的成绩，开始重新计分", previous.len());

        let store = self.store.clone();
        self.run_all(previous, move |result, index| {
            let store = store.clone();
            let key = key.clone();
            async move { process_rescore(&*store, &key, &result, index).await }
        })
        .await
    }

    /// 并发处理所有条目；出现配置错误后剩余条目标记为跳过
    async fn run_all<T, F, Fut>(&self, items: Vec<T>, process: F) -> Result<ProcessingStats>
    where
        T: Send + 'static,
        F: Fn(T, usize) -> Fut,
        Fut: Future<Output = SheetOutcome> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sheets.max(1)));
        let halted = Arc::new(AtomicBool::new(false));
        let mut stats = ProcessingStats {
            total: items.len(),
            ..Default::default()
        };

        let mut handles = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            let index = idx + 1;
            let permit = semaphore.clone().acquire_owned().await?;
            let halted = halted.clone();
            let task = process(item, index);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                if halted.load(Ordering::SeqCst) {
                    return SheetOutcome::Skipped;
                }
                let outcome = task.await;
                if outcome == SheetOutcome::Failed(Remediation::FixConfig) {
                    halted.store(true, Ordering::SeqCst);
                    error!("🛑 配置错误，停止处理剩余答题卡");
                }
                outcome
            });
            handles.push((index, handle));
        }

        for (index, handle) in handles {
            match handle.await {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    error!("[答题卡 #{}] 任务执行失败: {}", index, e);
                    stats.task_errors += 1;
                }
            }
        }

        Ok(stats)
    }
}

fn print_final_stats(stats: &ProcessingStats) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已计分: {}/{}", stats.graded, stats.total);
    info!("📝 待人工复核: {}", stats.needs_review);
    if stats.superseded > 0 {
        info!("↩️ 已有更新结果: {}", stats.superseded);
    }
    if stats.skipped > 0 {
        info!("⏭️ 跳过: {}", stats.skipped);
    }
    info!("❌ 失败: {}", stats.failed());
    if stats.failed() > 0 {
        info!("   ⏳ OCR 不可用（稍后重试）: {}", stats.retry_later);
        info!("   📷 输入无效（重新扫描）: {}", stats.rescan);
        info!("   🔑 配置错误（检查密钥）: {}", stats.config_errors);
        info!("   💾 保存失败: {}", stats.storage_errors);
        if stats.task_errors > 0 {
            info!("   💥 任务异常: {}", stats.task_errors);
        }
    }
    info!("{}", "=".repeat(60));
}
