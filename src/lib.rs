//! # Sheet Grader
//!
//! 扫描答题卡、调用 Gemini 识别答案并自动计分
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Clients / Infrastructure）
//! - `clients/` - Gemini 的两种传输方式，统一实现 `OcrTransport`
//! - `infrastructure/collage` - 多页拼图与 JPEG 编码
//! - `infrastructure/store` - 答案与成绩的 JSON 文件存储
//!
//! ### ② 业务能力层（Services）
//! - `CircuitBreaker` - 每种传输一个熔断器
//! - `OcrService` - 按传输顺序重试，区分可重试与致命错误
//! - `sanitizer` - 清洗模型输出
//! - `scoring` - 逐题判分
//! - `prompt` - 与清洗器共用哨兵词表的提示词
//!
//! ### ③ 流程层（Workflow）
//! - `GradingCtx` - 上下文封装（答题卡序号 + 文件夹名）
//! - `GradingFlow` - 流程编排（拼图 → OCR → 清洗 → 判分）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量处理器，管理资源和并发
//! - `orchestrator/sheet_processor` - 单张答题卡处理与保存
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, GradingMode};
pub use error::{AppError, GradingError, Remediation};
pub use models::{AnswerKeyRecord, AnswerMap, StudentResult};
pub use orchestrator::{App, ProcessingStats};
pub use workflow::{GradingCtx, GradingFlow};
