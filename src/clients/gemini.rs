/// Gemini REST 客户端
///
/// 封装 generateContent 请求与响应解析，两种传输方式共用
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clients::transport::{classify_error, classify_reqwest_error, OcrTransport, TransportKind};
use crate::config::Config;
use crate::error::{ErrorKind, TransportError};
use crate::utils::logging::truncate_text;

/// Gemini 端点（HTTP 客户端 + 凭据 + 模型）
#[derive(Clone)]
pub struct GeminiEndpoint {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model_name: String,
}

#[derive(Serialize)]
pub(crate) struct InlineData<'a> {
    pub mime_type: &'a str,
    pub data: String,
}

#[derive(Serialize)]
pub(crate) struct FileData<'a> {
    pub mime_type: &'a str,
    pub file_uri: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
pub(crate) enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
    File { file_data: FileData<'a> },
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiEndpoint {
    /// 创建端点；请求超时取自配置
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_api_base_url.trim_end_matches('/').to_string(),
            model_name: config.gemini_model_name.clone(),
        })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 非 2xx 响应按状态码与响应体分类
    pub(crate) async fn check_status(
        transport: TransportKind,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let kind = classify_error(Some(status.as_u16()), &body);
        warn!(
            "Gemini 返回错误状态 {} ({}): {}",
            status,
            kind,
            truncate_text(&body, 200)
        );
        Err(TransportError::from_kind(
            kind,
            transport.as_str(),
            format!("HTTP {}: {}", status.as_u16(), truncate_text(&body, 200)),
        ))
    }

    /// 调用 generateContent，返回所有文本片段拼接后的结果
    pub(crate) async fn generate(
        &self,
        transport: TransportKind,
        parts: Vec<Part<'_>>,
    ) -> Result<String, TransportError> {
        let url = self.url(&format!("v1beta/models/{}:generateContent", self.model_name));
        debug!("调用 Gemini generateContent，模型: {}，传输: {}", self.model_name, transport);

        let body = GenerateContentRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(transport, &e))?;

        let response = Self::check_status(transport, response).await?;

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest_error(transport, &e))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(TransportError::from_kind(
                ErrorKind::Retryable,
                transport.as_str(),
                "Gemini 返回内容为空",
            ));
        }

        debug!("Gemini 调用成功，返回 {} 字符", text.len());
        Ok(text)
    }
}

/// 内嵌 base64 图片的 HTTP 传输
pub struct GeminiInlineTransport {
    endpoint: GeminiEndpoint,
}

impl GeminiInlineTransport {
    pub fn new(endpoint: GeminiEndpoint) -> Self {
        Self { endpoint }
    }
}

impl OcrTransport for GeminiInlineTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Inline
    }

    fn send<'a>(
        &'a self,
        prompt: &'a str,
        image: &'a [u8],
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            let parts = vec![
                Part::Text { text: prompt },
                Part::Inline {
                    inline_data: InlineData {
                        mime_type,
                        data: BASE64_STANDARD.encode(image),
                    },
                },
            ];
            self.endpoint.generate(TransportKind::Inline, parts).await
        })
    }
}
