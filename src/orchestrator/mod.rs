//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量阅卷处理器
//! - 管理应用生命周期（初始化、运行）
//! - 按运行模式加载答题卡或已保存的成绩
//! - 控制并发数量（Semaphore）
//! - 输出全局统计信息
//!
//! ### `sheet_processor` - 单张答题卡处理器
//! - 调用 `GradingFlow` 处理一张答题卡
//! - 保存结果（最新扫描优先）
//! - 把失败归类为不同的处理建议
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<ScanFolder>)
//!     ↓
//! sheet_processor (处理单张答题卡 + 保存)
//!     ↓
//! workflow::GradingFlow (拼图 → OCR → 清洗 → 判分)
//!     ↓
//! services (能力层：ocr / sanitizer / scoring / prompt)
//!     ↓
//! clients + infrastructure (Gemini 传输、拼图、存储)
//! ```

pub mod batch_processor;
pub mod sheet_processor;

// 重新导出主要类型
pub use batch_processor::{App, ProcessingStats};
pub use sheet_processor::{process_answer_key_sheet, process_rescore, process_student_sheet, SheetOutcome};
