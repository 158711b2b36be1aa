use std::fmt;
use thiserror::Error;

/// 单张答题卡的输入问题：扫描件本身或模型输出无法使用
#[derive(Debug, Error)]
pub enum AppError {
    /// 输入错误（图片缺失、无可用图片）
    #[error("输入错误: {0}")]
    Input(#[from] InputError),
    /// 模型输出解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
}

/// 输入错误
#[derive(Debug, Error)]
pub enum InputError {
    /// 过滤后没有任何可用图片
    #[error("没有可用的图片（全部缺失或无法解码）")]
    EmptyInput,
    /// 图片文件不存在
    #[error("图片文件不存在: {path}")]
    ImageNotFound { path: String },
    /// 图片内容为空
    #[error("图片内容为空")]
    EmptyImage,
    /// 拼图单元宽度非法
    #[error("拼图单元宽度必须为正数: {width}")]
    InvalidTileWidth { width: u32 },
    /// 读取图片失败
    #[error("读取图片失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 图片编码失败
    #[error("图片编码失败: {0}")]
    EncodeFailed(#[from] image::ImageError),
    /// 拼图线程异常退出
    #[error("拼图任务异常终止: {0}")]
    TaskFailed(String),
}

/// 模型输出解析错误
///
/// 始终携带原始文本的前若干字符，便于排查
#[derive(Debug, Error)]
pub enum ParseError {
    /// 清理后仍不是合法 JSON
    #[error("模型输出不是合法 JSON ({source}); 原始内容: {excerpt}")]
    InvalidJson {
        excerpt: String,
        #[source]
        source: serde_json::Error,
    },
    /// 顶层不是 JSON 对象
    #[error("模型输出不是 JSON 对象; 原始内容: {excerpt}")]
    NotAnObject { excerpt: String },
}

impl ParseError {
    /// 原始文本摘录
    pub fn excerpt(&self) -> &str {
        match self {
            ParseError::InvalidJson { excerpt, .. } | ParseError::NotAnObject { excerpt } => {
                excerpt
            }
        }
    }
}

/// 传输错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 401 / 403 / API 密钥无效
    Auth,
    /// 429 / 配额 / 频率限制
    Quota,
    /// 400 / 404 / 请求格式错误
    Client,
    /// 其余错误（网络、超时、5xx）
    Retryable,
}

impl ErrorKind {
    /// 是否应立即终止整个重试流程
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Auth | ErrorKind::Client)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Quota => "QUOTA_ERROR",
            ErrorKind::Client => "CLIENT_ERROR",
            ErrorKind::Retryable => "RETRYABLE",
        };
        f.write_str(name)
    }
}

/// OCR 传输错误
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// 鉴权失败
    #[error("[{transport}] 鉴权失败: {message}")]
    Auth { transport: String, message: String },
    /// 配额耗尽或被限流
    #[error("[{transport}] 配额或频率限制: {message}")]
    Quota { transport: String, message: String },
    /// 请求本身有误
    #[error("[{transport}] 请求错误: {message}")]
    Client { transport: String, message: String },
    /// 可重试的错误
    #[error("[{transport}] 可重试错误: {message}")]
    Retryable { transport: String, message: String },
    /// 熔断器拒绝调用
    #[error("[{transport}] 熔断器打开，调用被拒绝")]
    CircuitOpen { transport: String },
}

impl TransportError {
    /// 按分类构造错误
    pub fn from_kind(kind: ErrorKind, transport: impl Into<String>, message: impl Into<String>) -> Self {
        let transport = transport.into();
        let message = message.into();
        match kind {
            ErrorKind::Auth => TransportError::Auth { transport, message },
            ErrorKind::Quota => TransportError::Quota { transport, message },
            ErrorKind::Client => TransportError::Client { transport, message },
            ErrorKind::Retryable => TransportError::Retryable { transport, message },
        }
    }

    /// 错误分类；熔断拒绝视为可重试
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Auth { .. } => ErrorKind::Auth,
            TransportError::Quota { .. } => ErrorKind::Quota,
            TransportError::Client { .. } => ErrorKind::Client,
            TransportError::Retryable { .. } | TransportError::CircuitOpen { .. } => {
                ErrorKind::Retryable
            }
        }
    }

    pub fn transport(&self) -> &str {
        match self {
            TransportError::Auth { transport, .. }
            | TransportError::Quota { transport, .. }
            | TransportError::Client { transport, .. }
            | TransportError::Retryable { transport, .. }
            | TransportError::CircuitOpen { transport } => transport,
        }
    }
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 答案记录不存在
    #[error("未找到答案: {assessment_uid}")]
    AnswerKeyNotFound { assessment_uid: String },
    /// 文件读写失败
    #[error("文件读写失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON 序列化或反序列化失败
    #[error("JSON 处理失败 ({path}): {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置值无法解析
    #[error("配置项 {name} 解析失败: 值 '{value}' 无法转换为 {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: String,
    },
    /// 必填配置缺失
    #[error("缺少必填配置: {name}")]
    Missing { name: String },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML 解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 数据不变量警告（不中断流程）
///
/// 答案记录声明的题目数与实际答案数量不一致时产生
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataInvariantWarning {
    pub declared_total: u32,
    pub actual_entries: usize,
}

impl fmt::Display for DataInvariantWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "声明题目数 {} 与答案数量 {} 不一致，按声明值计分",
            self.declared_total, self.actual_entries
        )
    }
}

/// 单次阅卷失败的结果
///
/// 三类失败对应不同的处理方式，不能合并为同一条提示
#[derive(Debug, Error)]
pub enum GradingError {
    /// 重试耗尽，OCR 服务不可用
    #[error("OCR 服务暂不可用，请稍后重试 ({0})")]
    OcrUnavailable(String),
    /// 扫描件或模型输出有问题
    #[error("输入无效，请重新扫描: {0}")]
    BadInput(#[source] AppError),
    /// 鉴权或请求配置错误
    #[error("配置错误，请检查 API 密钥与请求参数: {0}")]
    Config(#[source] TransportError),
    /// 持久化失败
    #[error("保存结果失败: {0}")]
    Store(#[from] StoreError),
}

/// 失败后的处理建议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    RetryLater,
    Rescan,
    FixConfig,
    CheckStorage,
}

impl GradingError {
    pub fn remediation(&self) -> Remediation {
        match self {
            GradingError::OcrUnavailable(_) => Remediation::RetryLater,
            GradingError::BadInput(_) => Remediation::Rescan,
            GradingError::Config(_) => Remediation::FixConfig,
            GradingError::Store(_) => Remediation::CheckStorage,
        }
    }
}

impl From<InputError> for GradingError {
    fn from(err: InputError) -> Self {
        GradingError::BadInput(AppError::Input(err))
    }
}

impl From<ParseError> for GradingError {
    fn from(err: ParseError) -> Self {
        GradingError::BadInput(AppError::Parse(err))
    }
}

// ========== 便捷构造函数 ==========

impl InputError {
    pub fn image_not_found(path: impl Into<String>) -> Self {
        InputError::ImageNotFound { path: path.into() }
    }
}

impl StoreError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<String>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}

impl ConfigError {
    pub fn invalid_value(
        name: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            name: name.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}
