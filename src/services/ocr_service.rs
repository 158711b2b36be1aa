//! OCR 请求服务 - 业务能力层
//!
//! 负责按传输顺序、熔断状态和退避策略发起 OCR 请求。
//! 普通的服务端失败不会以错误返回，而是体现在 `OcrOutcome` 中；
//! 只有调用方用法错误（例如图片不存在）才返回 `Err`。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clients::{
    GeminiEndpoint, GeminiFileTransport, GeminiInlineTransport, OcrTransport, TransportKind,
};
use crate::config::Config;
use crate::error::{InputError, TransportError};
use crate::services::circuit_breaker::{BreakerSettings, CircuitBreaker};

/// 待识别的图片
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// 磁盘上的图片文件
    File(PathBuf),
    /// 已编码的图片数据
    Encoded { bytes: Vec<u8>, mime_type: String },
}

impl ImageSource {
    pub fn file(path: impl AsRef<Path>) -> Self {
        ImageSource::File(path.as_ref().to_path_buf())
    }

    /// 读取图片内容；文件不存在或内容为空属于输入错误
    async fn load(&self) -> Result<(Vec<u8>, String), InputError> {
        match self {
            ImageSource::File(path) => {
                if !path.is_file() {
                    return Err(InputError::image_not_found(path.display().to_string()));
                }
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| InputError::ReadFailed {
                        path: path.display().to_string(),
                        source,
                    })?;
                if bytes.is_empty() {
                    return Err(InputError::EmptyImage);
                }
                Ok((bytes, mime_type_for(path).to_string()))
            }
            ImageSource::Encoded { bytes, mime_type } => {
                if bytes.is_empty() {
                    return Err(InputError::EmptyImage);
                }
                Ok((bytes.clone(), mime_type.clone()))
            }
        }
    }
}

/// 根据扩展名推断 MIME 类型
pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub exponential_backoff: bool,
    /// 第 n 次失败后等待 `backoff_base * 2^n`
    pub backoff_base: Duration,
    /// 关闭指数退避时的固定间隔
    pub retry_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            exponential_backoff: config.use_exponential_backoff,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            retry_interval: Duration::from_secs(config.retry_interval_secs),
        }
    }

    /// 第 `attempt` 次（从 1 开始）失败后的等待时间
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.exponential_backoff {
            self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.retry_interval
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            exponential_backoff: true,
            backoff_base: Duration::from_secs(1),
            retry_interval: Duration::from_secs(2),
        }
    }
}

/// 一种传输方式及其专属熔断器
#[derive(Clone)]
pub struct TransportSlot {
    pub transport: Arc<dyn OcrTransport>,
    pub breaker: Arc<CircuitBreaker>,
}

impl TransportSlot {
    pub fn new(transport: Arc<dyn OcrTransport>, settings: BreakerSettings) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(transport.kind().as_str(), settings));
        Self { transport, breaker }
    }
}

/// 单次传输调用的结果
enum AttemptResult {
    Success(String),
    Retryable(TransportError),
    Fatal(TransportError),
}

impl From<Result<String, TransportError>> for AttemptResult {
    fn from(result: Result<String, TransportError>) -> Self {
        match result {
            Ok(text) => AttemptResult::Success(text),
            Err(err) if err.kind().is_fatal() => AttemptResult::Fatal(err),
            Err(err) => AttemptResult::Retryable(err),
        }
    }
}

/// 一次完整请求（含重试）的结果
#[derive(Debug, Clone)]
pub enum OcrOutcome {
    Success {
        text: String,
        transport: TransportKind,
        attempt: u32,
    },
    /// 重试次数耗尽
    Exhausted {
        attempts: u32,
        last_error: Option<TransportError>,
    },
    /// 鉴权或请求错误，立即终止
    Fatal(TransportError),
}

impl OcrOutcome {
    pub fn into_text(self) -> Option<String> {
        match self {
            OcrOutcome::Success { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// OCR 请求服务
///
/// 持有按优先顺序排列的 (传输, 熔断器) 列表
pub struct OcrService {
    slots: Vec<TransportSlot>,
    policy: RetryPolicy,
}

impl OcrService {
    pub fn new(slots: Vec<TransportSlot>, policy: RetryPolicy) -> Self {
        Self { slots, policy }
    }

    /// 按配置创建 Gemini 传输，每种传输一个熔断器
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let endpoint = GeminiEndpoint::new(config)?;
        let settings = BreakerSettings {
            failure_threshold: config.breaker_failure_threshold,
            recovery_timeout: config.breaker_recovery_timeout(),
            success_threshold: config.breaker_success_threshold,
        };

        let slots = config
            .transport_order
            .iter()
            .map(|kind| {
                let transport: Arc<dyn OcrTransport> = match kind {
                    TransportKind::Files => Arc::new(GeminiFileTransport::new(endpoint.clone())),
                    TransportKind::Inline => Arc::new(GeminiInlineTransport::new(endpoint.clone())),
                };
                TransportSlot::new(transport, settings)
            })
            .collect();

        Ok(Self::new(slots, RetryPolicy::from_config(config)))
    }

    pub fn slots(&self) -> &[TransportSlot] {
        &self.slots
    }

    /// 按默认次数与配置顺序请求
    pub async fn request(&self, prompt: &str, image: &ImageSource) -> Result<OcrOutcome, InputError> {
        self.request_ordered(prompt, image, self.policy.max_attempts, &[])
            .await
    }

    /// 返回 `None` 表示彻底失败（重试耗尽或不可重试错误）
    pub async fn request_with_retry(
        &self,
        prompt: &str,
        image: &ImageSource,
        max_attempts: u32,
        preferred_order: &[TransportKind],
    ) -> Result<Option<String>, InputError> {
        let outcome = self
            .request_ordered(prompt, image, max_attempts, preferred_order)
            .await?;
        Ok(outcome.into_text())
    }

    /// `preferred_order` 为空时使用构造时的顺序
    fn ordered_slots(&self, preferred_order: &[TransportKind]) -> Vec<&TransportSlot> {
        if preferred_order.is_empty() {
            return self.slots.iter().collect();
        }
        preferred_order
            .iter()
            .flat_map(|kind| {
                self.slots
                    .iter()
                    .filter(move |slot| slot.transport.kind() == *kind)
            })
            .collect()
    }

    pub async fn request_ordered(
        &self,
        prompt: &str,
        image: &ImageSource,
        max_attempts: u32,
        preferred_order: &[TransportKind],
    ) -> Result<OcrOutcome, InputError> {
        // 先校验图片，再消耗重试次数
        let (bytes, mime_type) = image.load().await?;
        let slots = self.ordered_slots(preferred_order);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!("OCR 请求第 {}/{} 次", attempt, max_attempts);

            for slot in &slots {
                let kind = slot.transport.kind();

                if !slot.breaker.can_proceed() {
                    debug!("熔断器 [{}] 打开，跳过该传输", slot.breaker.name());
                    last_error = Some(TransportError::CircuitOpen {
                        transport: kind.as_str().to_string(),
                    });
                    continue;
                }

                let result = slot.transport.send(prompt, &bytes, &mime_type).await;
                match AttemptResult::from(result) {
                    AttemptResult::Success(text) => {
                        slot.breaker.record_success();
                        info!("✓ OCR 请求成功 (传输: {}, 第 {} 次)", kind, attempt);
                        return Ok(OcrOutcome::Success {
                            text,
                            transport: kind,
                            attempt,
                        });
                    }
                    AttemptResult::Retryable(err) => {
                        slot.breaker.record_failure();
                        warn!(
                            "OCR 请求失败 (尝试 {}/{}, {}): {}",
                            attempt,
                            max_attempts,
                            err.kind(),
                            err
                        );
                        last_error = Some(err);
                    }
                    AttemptResult::Fatal(err) => {
                        slot.breaker.record_failure();
                        error!("❌ 不可重试的 OCR 错误 ({})，终止重试: {}", err.kind(), err);
                        return Ok(OcrOutcome::Fatal(err));
                    }
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_after(attempt);
                info!("等待 {:?} 后重试...", delay);
                sleep(delay).await;
            }
        }

        warn!("OCR 请求失败，已尝试 {} 次", max_attempts);
        Ok(OcrOutcome::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::circuit_breaker::CircuitState;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按脚本返回结果的假传输
    struct ScriptedTransport {
        kind: TransportKind,
        script: Mutex<VecDeque<Result<String, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(kind: TransportKind, script: Vec<Result<String, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl OcrTransport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn send<'a>(
            &'a self,
            _prompt: &'a str,
            _image: &'a [u8],
            _mime_type: &'a str,
        ) -> BoxFuture<'a, Result<String, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front().unwrap_or_else(|| {
                Err(TransportError::from_kind(
                    ErrorKind::Retryable,
                    self.kind.as_str(),
                    "503 unavailable",
                ))
            });
            Box::pin(async move { next })
        }
    }

    fn err(kind: ErrorKind, transport: TransportKind) -> Result<String, TransportError> {
        Err(TransportError::from_kind(kind, transport.as_str(), "scripted"))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            exponential_backoff: true,
            backoff_base: Duration::ZERO,
            retry_interval: Duration::ZERO,
        }
    }

    fn image() -> ImageSource {
        ImageSource::Encoded {
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime_type: "image/jpeg".to_string(),
        }
    }

    fn service(
        transports: &[Arc<ScriptedTransport>],
        max_attempts: u32,
    ) -> OcrService {
        let slots = transports
            .iter()
            .map(|t| {
                let transport: Arc<dyn OcrTransport> = t.clone();
                TransportSlot::new(transport, BreakerSettings::default())
            })
            .collect();
        OcrService::new(slots, fast_policy(max_attempts))
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let files = ScriptedTransport::new(TransportKind::Files, vec![Ok("{\"Q1\":\"A\"}".into())]);
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![]);
        let svc = service(&[files.clone(), inline.clone()], 3);

        let outcome = svc.request("prompt", &image()).await.unwrap();

        assert!(matches!(
            outcome,
            OcrOutcome::Success { transport: TransportKind::Files, attempt: 1, .. }
        ));
        assert_eq!(files.calls(), 1);
        assert_eq!(inline.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_transport_within_attempt() {
        let files = ScriptedTransport::new(
            TransportKind::Files,
            vec![err(ErrorKind::Retryable, TransportKind::Files)],
        );
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![Ok("{}".into())]);
        let svc = service(&[files.clone(), inline.clone()], 3);

        let text = svc
            .request_with_retry("prompt", &image(), 3, &[])
            .await
            .unwrap();

        assert_eq!(text.as_deref(), Some("{}"));
        assert_eq!(files.calls(), 1);
        assert_eq!(inline.calls(), 1);
        assert_eq!(svc.slots()[0].breaker.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_auth_error_stops_everything() {
        let files = ScriptedTransport::new(
            TransportKind::Files,
            vec![err(ErrorKind::Auth, TransportKind::Files)],
        );
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![Ok("{}".into())]);
        let svc = service(&[files.clone(), inline.clone()], 3);

        let outcome = svc.request("prompt", &image()).await.unwrap();

        assert!(matches!(outcome, OcrOutcome::Fatal(ref e) if e.kind() == ErrorKind::Auth));
        assert_eq!(files.calls(), 1);
        assert_eq!(inline.calls(), 0);
    }

    #[tokio::test]
    async fn test_client_error_returns_none() {
        let inline = ScriptedTransport::new(
            TransportKind::Inline,
            vec![err(ErrorKind::Client, TransportKind::Inline)],
        );
        let svc = service(&[inline.clone()], 3);

        let text = svc
            .request_with_retry("prompt", &image(), 3, &[])
            .await
            .unwrap();

        assert!(text.is_none());
        assert_eq!(inline.calls(), 1);
    }

    #[tokio::test]
    async fn test_quota_errors_are_retried_until_exhausted() {
        let inline = ScriptedTransport::new(
            TransportKind::Inline,
            vec![
                err(ErrorKind::Quota, TransportKind::Inline),
                err(ErrorKind::Quota, TransportKind::Inline),
            ],
        );
        let svc = service(&[inline.clone()], 2);

        let outcome = svc.request("prompt", &image()).await.unwrap();

        match outcome {
            OcrOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error.unwrap().kind(), ErrorKind::Quota);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(inline.calls(), 2);
    }

    #[tokio::test]
    async fn test_open_breaker_is_skipped() {
        let files = ScriptedTransport::new(TransportKind::Files, vec![Ok("never".into())]);
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![Ok("{}".into())]);
        let svc = service(&[files.clone(), inline.clone()], 1);
        for _ in 0..3 {
            svc.slots()[0].breaker.record_failure();
        }
        assert_eq!(svc.slots()[0].breaker.state(), CircuitState::Open);
        assert_eq!(svc.slots()[0].breaker.name(), "files");

        let text = svc
            .request_with_retry("prompt", &image(), 1, &[])
            .await
            .unwrap();

        assert_eq!(text.as_deref(), Some("{}"));
        assert_eq!(files.calls(), 0);
    }

    #[tokio::test]
    async fn test_preferred_order_overrides_slot_order() {
        let files = ScriptedTransport::new(TransportKind::Files, vec![Ok("files".into())]);
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![Ok("inline".into())]);
        let svc = service(&[files.clone(), inline.clone()], 1);

        let text = svc
            .request_with_retry("prompt", &image(), 1, &[TransportKind::Inline])
            .await
            .unwrap();

        assert_eq!(text.as_deref(), Some("inline"));
        assert_eq!(files.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_image_fails_before_any_attempt() {
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![Ok("{}".into())]);
        let svc = service(&[inline.clone()], 3);

        let result = svc
            .request_with_retry(
                "prompt",
                &ImageSource::file("/no/such/collage.jpg"),
                3,
                &[],
            )
            .await;

        assert!(matches!(result, Err(InputError::ImageNotFound { .. })));
        assert_eq!(inline.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts_but_not_after_the_last() {
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![]);
        let transport: Arc<dyn OcrTransport> = inline.clone();
        let svc = OcrService::new(
            vec![TransportSlot::new(
                transport,
                BreakerSettings {
                    failure_threshold: 10,
                    ..BreakerSettings::default()
                },
            )],
            RetryPolicy {
                max_attempts: 3,
                exponential_backoff: true,
                backoff_base: Duration::from_secs(1),
                retry_interval: Duration::from_secs(5),
            },
        );

        let started = tokio::time::Instant::now();
        let outcome = svc.request("prompt", &image()).await.unwrap();

        // 2s + 4s，第三次失败后不再等待
        assert_eq!(started.elapsed(), Duration::from_secs(6));
        assert!(matches!(outcome, OcrOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(inline.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flat_interval_between_attempts() {
        let inline = ScriptedTransport::new(TransportKind::Inline, vec![]);
        let transport: Arc<dyn OcrTransport> = inline.clone();
        let svc = OcrService::new(
            vec![TransportSlot::new(transport, BreakerSettings::default())],
            RetryPolicy {
                max_attempts: 3,
                exponential_backoff: false,
                backoff_base: Duration::from_secs(1),
                retry_interval: Duration::from_secs(5),
            },
        );

        let started = tokio::time::Instant::now();
        svc.request("prompt", &image()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy {
            max_attempts: 3,
            exponential_backoff: true,
            backoff_base: Duration::from_secs(1),
            retry_interval: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));

        let flat = RetryPolicy {
            exponential_backoff: false,
            ..policy
        };
        assert_eq!(flat.delay_after(1), Duration::from_secs(5));
        assert_eq!(flat.delay_after(3), Duration::from_secs(5));
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for(Path::new("a/page.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("page.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("page")), "application/octet-stream");
    }
}
