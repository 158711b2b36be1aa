//! 阅卷上下文
//!
//! 封装"我正在处理第几张答题卡、属于谁"这一信息

use std::fmt::Display;

/// 单张答题卡的处理上下文
#[derive(Debug, Clone)]
pub struct GradingCtx {
    /// 扫描文件夹名（学生模式下即学号）
    pub sheet_id: String,

    /// 答题卡序号（仅用于日志显示）
    pub sheet_index: usize,
}

impl GradingCtx {
    pub fn new(sheet_id: impl Into<String>, sheet_index: usize) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            sheet_index,
        }
    }
}

impl Display for GradingCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[答题卡 #{} {}]", self.sheet_index, self.sheet_id)
    }
}
