use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use core_types::{
    BrowserNavigateArgs, BrowserScrapeArgs, BrowserScreenshotArgs, FetchArgs, FilesystemReadArgs,
    FilesystemWriteArgs, HttpMethod, OcrArgs, OcrResult, PdfExtractArgs, PdfExtractResult,
    TextEncoding, ToolCallError, ToolServerKind,
};
use serde_json::{Value, json};

use crate::{ToolProvider, parse_args};

async fn post_json(client: &reqwest::Client, url: &str, payload: &Value) -> Result<reqwest::Response> {
    let response = client
        .post(url)
        .json(payload)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;
    response
        .error_for_status()
        .with_context(|| format!("{url} returned an error status"))
}

/// Browser automation, forwarded to a remote automation service.
pub struct BrowserProvider {
    http: reqwest::Client,
    base_url: String,
}

impl BrowserProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ToolProvider for BrowserProvider {
    fn server(&self) -> ToolServerKind {
        ToolServerKind::Browser
    }

    fn tools(&self) -> &'static [&'static str] {
        &["navigate", "screenshot", "scrape"]
    }

    fn validate(&self, tool: &str, args: &Value) -> Result<(), ToolCallError> {
        match tool {
            "navigate" => parse_args::<BrowserNavigateArgs>(self.server(), tool, args).map(|_| ()),
            "screenshot" => parse_args::<BrowserScreenshotArgs>(self.server(), tool, args).map(|_| ()),
            "scrape" => parse_args::<BrowserScrapeArgs>(self.server(), tool, args).map(|_| ()),
            other => Err(ToolCallError::UnknownTool {
                server: self.server(),
                tool: other.to_string(),
            }),
        }
    }

    async fn call(&self, tool: &str, args: Value) -> Result<Value> {
        let response = post_json(&self.http, &format!("{}/{tool}", self.base_url), &args).await?;
        response.json().await.context("invalid browser service response")
    }
}

/// Generic HTTP fetch.
pub struct FetchProvider {
    http: reqwest::Client,
}

impl FetchProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for FetchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProvider for FetchProvider {
    fn server(&self) -> ToolServerKind {
        ToolServerKind::Fetch
    }

    fn tools(&self) -> &'static [&'static str] {
        &["fetch"]
    }

    fn validate(&self, tool: &str, args: &Value) -> Result<(), ToolCallError> {
        parse_args::<FetchArgs>(self.server(), tool, args).map(|_| ())
    }

    async fn call(&self, _tool: &str, args: Value) -> Result<Value> {
        let args: FetchArgs = serde_json::from_value(args)
            .map_err(|err| anyhow!("invalid fetch arguments: {err}"))?;

        let mut request = match args.method.unwrap_or(HttpMethod::Get) {
            HttpMethod::Get => self.http.get(&args.url),
            HttpMethod::Post => self.http.post(&args.url),
            HttpMethod::Put => self.http.put(&args.url),
            HttpMethod::Delete => self.http.delete(&args.url),
        };
        if let Some(headers) = &args.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(body) = args.body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("fetch of {} failed", args.url))?;
        let status = response.status().as_u16();
        let headers: std::collections::BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.text().await.context("failed to read response body")?;

        Ok(json!({
            "status": status,
            "headers": headers,
            "body": body,
        }))
    }
}

/// Read/write inside a configured workspace root. Paths are relative to
/// the root; anything escaping it is rejected at validation time.
pub struct FilesystemProvider {
    root: PathBuf,
}

impl FilesystemProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let path = Path::new(raw);
        if path.is_absolute() {
            return Err(format!("path `{raw}` must be relative to the workspace root"));
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(format!("path `{raw}` escapes the workspace root")),
            }
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ToolProvider for FilesystemProvider {
    fn server(&self) -> ToolServerKind {
        ToolServerKind::Filesystem
    }

    fn tools(&self) -> &'static [&'static str] {
        &["read", "write"]
    }

    fn validate(&self, tool: &str, args: &Value) -> Result<(), ToolCallError> {
        let path = match tool {
            "read" => parse_args::<FilesystemReadArgs>(self.server(), tool, args)?.path,
            "write" => parse_args::<FilesystemWriteArgs>(self.server(), tool, args)?.path,
            other => {
                return Err(ToolCallError::UnknownTool {
                    server: self.server(),
                    tool: other.to_string(),
                });
            }
        };
        self.resolve(&path)
            .map(|_| ())
            .map_err(|reason| ToolCallError::InvalidArguments {
                server: self.server(),
                tool: tool.to_string(),
                reason,
            })
    }

    async fn call(&self, tool: &str, args: Value) -> Result<Value> {
        match tool {
            "read" => {
                let args: FilesystemReadArgs = serde_json::from_value(args)?;
                let path = self.resolve(&args.path).map_err(|reason| anyhow!(reason))?;
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let content = match args.encoding {
                    TextEncoding::Utf8 => String::from_utf8(bytes)
                        .with_context(|| format!("{} is not valid utf-8", path.display()))?,
                    TextEncoding::Base64 => BASE64.encode(bytes),
                };
                Ok(json!({"path": args.path, "content": content, "encoding": args.encoding}))
            }
            "write" => {
                let args: FilesystemWriteArgs = serde_json::from_value(args)?;
                let path = self.resolve(&args.path).map_err(|reason| anyhow!(reason))?;
                let bytes = match args.encoding {
                    TextEncoding::Utf8 => args.content.into_bytes(),
                    TextEncoding::Base64 => BASE64
                        .decode(args.content.as_bytes())
                        .context("content is not valid base64")?,
                };
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let written = bytes.len();
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                Ok(json!({"path": args.path, "bytes": written}))
            }
            other => bail!("filesystem provider has no tool `{other}`"),
        }
    }
}

/// PDF extraction via a remote extraction service.
pub struct PdfExtractProvider {
    http: reqwest::Client,
    base_url: String,
}

impl PdfExtractProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ToolProvider for PdfExtractProvider {
    fn server(&self) -> ToolServerKind {
        ToolServerKind::PdfExtractor
    }

    fn tools(&self) -> &'static [&'static str] {
        &["extract"]
    }

    fn validate(&self, tool: &str, args: &Value) -> Result<(), ToolCallError> {
        parse_args::<PdfExtractArgs>(self.server(), tool, args).map(|_| ())
    }

    async fn call(&self, _tool: &str, args: Value) -> Result<Value> {
        let response = post_json(&self.http, &format!("{}/extract", self.base_url), &args).await?;
        // Deserializing into the typed result validates the provider's
        // response before it enters the envelope.
        let result: PdfExtractResult = response
            .json()
            .await
            .context("invalid pdf extraction response")?;
        Ok(serde_json::to_value(result)?)
    }
}

/// OCR via a remote recognition service.
pub struct OcrProvider {
    http: reqwest::Client,
    base_url: String,
}

impl OcrProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ToolProvider for OcrProvider {
    fn server(&self) -> ToolServerKind {
        ToolServerKind::OcrService
    }

    fn tools(&self) -> &'static [&'static str] {
        &["recognize"]
    }

    fn validate(&self, tool: &str, args: &Value) -> Result<(), ToolCallError> {
        parse_args::<OcrArgs>(self.server(), tool, args).map(|_| ())
    }

    async fn call(&self, _tool: &str, args: Value) -> Result<Value> {
        let response = post_json(&self.http, &format!("{}/recognize", self.base_url), &args).await?;
        let result: OcrResult = response.json().await.context("invalid ocr response")?;
        Ok(serde_json::to_value(result)?)
    }
}
