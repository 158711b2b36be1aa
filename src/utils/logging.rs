/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化 tracing 订阅者
///
/// 优先使用 `RUST_LOG`；未设置时默认 `info`，详细模式为 `debug`。
/// 重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 答题卡自动阅卷");
    info!("🧭 运行模式: {:?}", config.grading_mode);
    info!(
        "🤖 模型: {}，传输顺序: {:?}",
        config.gemini_model_name, config.transport_order
    );
    info!("📊 最大并发数: {}", config.max_concurrent_sheets);
    info!("{}", "=".repeat(60));
}

/// 记录答题卡加载信息
///
/// # 参数
/// - `total`: 答题卡总数
/// - `max_concurrent`: 最大并发数
pub fn log_sheets_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 张待处理的答题卡", total);
    info!("📋 同时处理 {} 张\n", max_concurrent.max(1));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("答题卡识别", 2), "答题...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        init(true);
    }
}
