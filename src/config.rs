use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::clients::TransportKind;
use crate::error::ConfigError;

/// 运行模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    /// 扫描学生答题卡并计分
    Student,
    /// 扫描标准答案并保存
    AnswerKey,
    /// 按最新答案重新计算已保存的成绩（不调用 OCR）
    Rescore,
}

impl FromStr for GradingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(GradingMode::Student),
            "answer_key" | "answerkey" | "key" => Ok(GradingMode::AnswerKey),
            "rescore" => Ok(GradingMode::Rescore),
            _ => Err(ConfigError::invalid_value(
                "GRADING_MODE",
                s,
                "student | answer_key | rescore",
            )),
        }
    }
}

/// 程序配置文件
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- Gemini 配置 ---
    pub gemini_api_key: String,
    pub gemini_api_base_url: String,
    pub gemini_model_name: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 依次尝试的传输方式
    pub transport_order: Vec<TransportKind>,

    // --- 重试与熔断 ---
    pub max_attempts: u32,
    /// 关闭时使用固定间隔
    pub use_exponential_backoff: bool,
    /// 指数退避基数（毫秒），第 n 次失败后等待 2^n 倍
    pub backoff_base_ms: u64,
    pub retry_interval_secs: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout_secs: u64,
    pub breaker_success_threshold: u32,

    // --- 拼图 ---
    pub tile_width: u32,
    pub collage_gutter: u32,
    pub jpeg_quality: u8,

    // --- 阅卷 ---
    pub grading_mode: GradingMode,
    pub assessment_uid: String,
    /// 启动时导入的标准答案 JSON（可选）
    pub answer_key_file: Option<String>,
    /// 识别标准答案时已知的题目数（可选）
    pub answer_key_questions: Option<u32>,
    /// 扫描件目录，每个子文件夹为一张答题卡
    pub scan_dir: String,
    /// 答案与成绩存放目录
    pub store_dir: String,
    /// 同时处理的答题卡数量
    pub max_concurrent_sheets: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model_name: "gemini-2.0-flash".to_string(),
            request_timeout_secs: 30,
            transport_order: vec![TransportKind::Files, TransportKind::Inline],
            max_attempts: 3,
            use_exponential_backoff: true,
            backoff_base_ms: 1000,
            retry_interval_secs: 2,
            breaker_failure_threshold: 3,
            breaker_recovery_timeout_secs: 60,
            breaker_success_threshold: 2,
            tile_width: 800,
            collage_gutter: 20,
            jpeg_quality: 90,
            grading_mode: GradingMode::Student,
            assessment_uid: String::new(),
            answer_key_file: None,
            answer_key_questions: None,
            scan_dir: "scans".to_string(),
            store_dir: "data".to_string(),
            max_concurrent_sheets: 1,
            verbose_logging: false,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

impl Config {
    /// 加载配置：`GRADER_CONFIG` 指向的 TOML 文件（若有），再叠加环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("GRADER_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.apply_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 环境变量覆盖；无法解析的数值保留原值
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        let transport_order = match std::env::var("TRANSPORT_ORDER") {
            Ok(raw) => parse_transport_order(&raw)?,
            Err(_) => self.transport_order,
        };
        let grading_mode = match std::env::var("GRADING_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => self.grading_mode,
        };

        Ok(Self {
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("GOOGLE_API_KEY"))
                .unwrap_or(self.gemini_api_key),
            gemini_api_base_url: env_string_or("GEMINI_API_BASE_URL", self.gemini_api_base_url),
            gemini_model_name: env_string_or("GEMINI_MODEL_NAME", self.gemini_model_name),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", self.request_timeout_secs),
            transport_order,
            max_attempts: env_or("MAX_ATTEMPTS", self.max_attempts),
            use_exponential_backoff: env_or("USE_EXPONENTIAL_BACKOFF", self.use_exponential_backoff),
            backoff_base_ms: env_or("BACKOFF_BASE_MS", self.backoff_base_ms),
            retry_interval_secs: env_or("RETRY_INTERVAL_SECS", self.retry_interval_secs),
            breaker_failure_threshold: env_or("BREAKER_FAILURE_THRESHOLD", self.breaker_failure_threshold),
            breaker_recovery_timeout_secs: env_or(
                "BREAKER_RECOVERY_TIMEOUT_SECS",
                self.breaker_recovery_timeout_secs,
            ),
            breaker_success_threshold: env_or("BREAKER_SUCCESS_THRESHOLD", self.breaker_success_threshold),
            tile_width: env_or("TILE_WIDTH", self.tile_width),
            collage_gutter: env_or("COLLAGE_GUTTER", self.collage_gutter),
            jpeg_quality: env_or("JPEG_QUALITY", self.jpeg_quality),
            grading_mode,
            assessment_uid: env_string_or("ASSESSMENT_UID", self.assessment_uid),
            answer_key_file: std::env::var("ANSWER_KEY_FILE").ok().or(self.answer_key_file),
            answer_key_questions: std::env::var("ANSWER_KEY_QUESTIONS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .or(self.answer_key_questions),
            scan_dir: env_string_or("SCAN_DIR", self.scan_dir),
            store_dir: env_string_or("STORE_DIR", self.store_dir),
            max_concurrent_sheets: env_or("MAX_CONCURRENT_SHEETS", self.max_concurrent_sheets),
            verbose_logging: env_or("VERBOSE_LOGGING", self.verbose_logging),
        })
    }

    /// 检查运行前必须具备的配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        let needs_ocr = self.grading_mode != GradingMode::Rescore;
        if needs_ocr && self.gemini_api_key.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "GEMINI_API_KEY".to_string(),
            });
        }
        if needs_ocr && self.transport_order.is_empty() {
            return Err(ConfigError::Missing {
                name: "TRANSPORT_ORDER".to_string(),
            });
        }
        if self.grading_mode != GradingMode::AnswerKey && self.assessment_uid.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "ASSESSMENT_UID".to_string(),
            });
        }
        if self.tile_width == 0 {
            return Err(ConfigError::invalid_value("TILE_WIDTH", "0", "正整数"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid_value("MAX_ATTEMPTS", "0", "正整数"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn breaker_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker_recovery_timeout_secs)
    }
}

/// 解析逗号分隔的传输顺序，例如 `files,inline`
pub fn parse_transport_order(raw: &str) -> Result<Vec<TransportKind>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<TransportKind>()
                .map_err(|_| ConfigError::invalid_value("TRANSPORT_ORDER", part, "files | inline"))
        })
        .collect()
}
