/// Gemini 文件上传传输
///
/// 流程：上传图片（暂存）→ 引用文件 URI 生成 → 删除暂存文件。
/// 暂存文件在成功、失败和提前退出时都会被释放。
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::clients::gemini::{FileData, GeminiEndpoint, Part};
use crate::clients::transport::{classify_reqwest_error, OcrTransport, TransportKind};
use crate::error::{ErrorKind, TransportError};

const TRANSPORT: TransportKind = TransportKind::Files;

/// 服务端暂存的文件
#[derive(Debug, Clone)]
struct StagedFile {
    /// 资源名，形如 `files/abc123`
    name: String,
    uri: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Deserialize)]
struct UploadedFile {
    name: String,
    uri: String,
}

/// 持有暂存文件，直到显式释放；未释放即被丢弃时在后台删除
struct StagedFileGuard {
    endpoint: GeminiEndpoint,
    file: Option<StagedFile>,
}

impl StagedFileGuard {
    fn new(endpoint: GeminiEndpoint, file: StagedFile) -> Self {
        Self {
            endpoint,
            file: Some(file),
        }
    }

    async fn release(mut self) {
        if let Some(file) = self.file.take() {
            delete_file(&self.endpoint, &file).await;
        }
    }
}

impl Drop for StagedFileGuard {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let endpoint = self.endpoint.clone();
                handle.spawn(async move {
                    delete_file(&endpoint, &file).await;
                });
            }
            Err(_) => warn!("无运行时可用，暂存文件未删除: {}", file.name),
        }
    }
}

async fn delete_file(endpoint: &GeminiEndpoint, file: &StagedFile) {
    let url = endpoint.url(&format!("v1beta/{}", file.name));
    let result = endpoint
        .client()
        .delete(&url)
        .header("x-goog-api-key", endpoint.api_key())
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            debug!("已删除暂存文件: {}", file.name);
        }
        Ok(response) => warn!("删除暂存文件失败 {}: HTTP {}", file.name, response.status()),
        Err(e) => warn!("删除暂存文件失败 {}: {}", file.name, e),
    }
}

/// 文件上传方式的 OCR 传输
pub struct GeminiFileTransport {
    endpoint: GeminiEndpoint,
    display_name: String,
}

impl GeminiFileTransport {
    pub fn new(endpoint: GeminiEndpoint) -> Self {
        Self {
            endpoint,
            display_name: "answer-sheet-collage".to_string(),
        }
    }

    /// 可恢复上传协议：start 获取上传地址，再一次性 upload + finalize
    async fn stage(&self, image: &[u8], mime_type: &str) -> Result<StagedFile, TransportError> {
        let start = self
            .endpoint
            .client()
            .post(self.endpoint.url("upload/v1beta/files"))
            .header("x-goog-api-key", self.endpoint.api_key())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", image.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": self.display_name } }))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(TRANSPORT, &e))?;
        let start = GeminiEndpoint::check_status(TRANSPORT, start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::from_kind(ErrorKind::Retryable, TRANSPORT.as_str(), "上传响应缺少 x-goog-upload-url")
            })?;

        let uploaded = self
            .endpoint
            .client()
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| classify_reqwest_error(TRANSPORT, &e))?;
        let uploaded = GeminiEndpoint::check_status(TRANSPORT, uploaded).await?;

        let parsed: UploadResponse = uploaded
            .json()
            .await
            .map_err(|e| classify_reqwest_error(TRANSPORT, &e))?;

        debug!("图片已暂存: {} ({} 字节)", parsed.file.name, image.len());
        Ok(StagedFile {
            name: parsed.file.name,
            uri: parsed.file.uri,
        })
    }
}

impl OcrTransport for GeminiFileTransport {
    fn kind(&self) -> TransportKind {
        TRANSPORT
    }

    fn send<'a>(
        &'a self,
        prompt: &'a str,
        image: &'a [u8],
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            let staged = self.stage(image, mime_type).await?;
            let file_uri = staged.uri.clone();
            let guard = StagedFileGuard::new(self.endpoint.clone(), staged);

            let parts = vec![
                Part::Text { text: prompt },
                Part::File {
                    file_data: FileData {
                        mime_type,
                        file_uri: &file_uri,
                    },
                },
            ];
            let result = self.endpoint.generate(TRANSPORT, parts).await;

            guard.release().await;
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// 本地 Gemini 假服务对 generateContent 的响应方式
    #[derive(Clone, Copy)]
    enum Generate {
        Fail,
        Succeed,
        Hang,
    }

    /// 本地假服务：完整走一遍上传、生成、删除，并记录收到的删除请求
    struct FakeGemini {
        addr: SocketAddr,
        deleted: Arc<Mutex<Vec<String>>>,
    }

    impl FakeGemini {
        async fn start(generate: Generate) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let deleted = Arc::new(Mutex::new(Vec::new()));

            let log = deleted.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(handle(stream, addr, generate, log.clone()));
                }
            });

            Self { addr, deleted }
        }

        fn transport(&self) -> GeminiFileTransport {
            let config = Config {
                gemini_api_key: "test-key".to_string(),
                gemini_api_base_url: format!("http://{}", self.addr),
                request_timeout_secs: 5,
                ..Config::default()
            };
            GeminiFileTransport::new(GeminiEndpoint::new(&config).unwrap())
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().clone()
        }
    }

    async fn handle(
        stream: TcpStream,
        addr: SocketAddr,
        generate: Generate,
        deleted: Arc<Mutex<Vec<String>>>,
    ) {
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
            return;
        }
        let mut fields = request_line.split_whitespace();
        let method = fields.next().unwrap_or_default().to_string();
        let path = fields.next().unwrap_or_default().to_string();

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0u8; content_length];
        let _ = reader.read_exact(&mut body).await;

        let (status, headers, payload) = match (method.as_str(), path.as_str()) {
            ("POST", "/upload/v1beta/files") => (
                "200 OK",
                format!("x-goog-upload-url: http://{}/upload-session\r\n", addr),
                String::new(),
            ),
            ("POST", "/upload-session") => (
                "200 OK",
                String::new(),
                format!(
                    r#"{{"file": {{"name": "files/abc123", "uri": "http://{}/v1beta/files/abc123"}}}}"#,
                    addr
                ),
            ),
            ("POST", p) if p.ends_with(":generateContent") => match generate {
                Generate::Fail => (
                    "500 Internal Server Error",
                    String::new(),
                    r#"{"error": {"code": 500, "message": "internal error"}}"#.to_string(),
                ),
                Generate::Succeed => (
                    "200 OK",
                    String::new(),
                    r#"{"candidates": [{"content": {"parts": [{"text": "{\"Q1\": \"A\"}"}]}}]}"#
                        .to_string(),
                ),
                Generate::Hang => {
                    std::future::pending::<()>().await;
                    return;
                }
            },
            ("DELETE", p) => {
                deleted.lock().push(p.to_string());
                ("200 OK", String::new(), "{}".to_string())
            }
            _ => ("404 Not Found", String::new(), "{}".to_string()),
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
            status,
            payload.len(),
            headers,
            payload
        );
        let mut stream = reader.into_inner();
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    #[test]
    fn test_upload_response_parsing() {
        let parsed: UploadResponse = serde_json::from_str(
            r#"{"file": {"name": "files/abc123", "uri": "https://example.test/v1beta/files/abc123", "mimeType": "image/jpeg", "state": "ACTIVE"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.file.name, "files/abc123");
        assert!(parsed.file.uri.ends_with("abc123"));
    }

    #[tokio::test]
    async fn test_unreachable_upload_is_retryable() {
        let config = Config {
            gemini_api_base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..Config::default()
        };
        let transport = GeminiFileTransport::new(GeminiEndpoint::new(&config).unwrap());

        let err = transport
            .send("prompt", b"jpeg", "image/jpeg")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(err.transport(), "files");
    }

    #[tokio::test]
    async fn test_staged_file_deleted_after_failed_generation() {
        let server = FakeGemini::start(Generate::Fail).await;

        let err = server
            .transport()
            .send("prompt", b"jpeg", "image/jpeg")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(server.deleted(), vec!["/v1beta/files/abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_staged_file_deleted_after_successful_generation() {
        let server = FakeGemini::start(Generate::Succeed).await;

        let text = server
            .transport()
            .send("prompt", b"jpeg", "image/jpeg")
            .await
            .unwrap();

        assert_eq!(text, r#"{"Q1": "A"}"#);
        assert_eq!(server.deleted(), vec!["/v1beta/files/abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_staged_file_deleted_when_request_is_dropped() {
        let server = FakeGemini::start(Generate::Hang).await;
        let transport = server.transport();

        let outcome = tokio::time::timeout(
            Duration::from_millis(300),
            transport.send("prompt", b"jpeg", "image/jpeg"),
        )
        .await;
        assert!(outcome.is_err());

        // 删除在后台任务中进行
        for _ in 0..100 {
            if !server.deleted().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.deleted(), vec!["/v1beta/files/abc123".to_string()]);
    }
}
