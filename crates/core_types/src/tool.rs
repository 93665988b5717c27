use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The five capability providers reachable through the tool gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ToolServerKind {
    Browser,
    Fetch,
    Filesystem,
    PdfExtractor,
    OcrService,
}

impl ToolServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Fetch => "fetch",
            Self::Filesystem => "filesystem",
            Self::PdfExtractor => "pdf-extractor",
            Self::OcrService => "ocr-service",
        }
    }
}

impl std::fmt::Display for ToolServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform call shape: server identifier, tool name, argument payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub server: ToolServerKind,
    pub tool: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(server: ToolServerKind, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            server,
            tool: tool.into(),
            arguments,
        }
    }
}

/// Uniform result envelope returned for every gateway call regardless of
/// the provider-native response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolOutcome {
    pub fn ok(data: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }
}

/// Validation failure, rejected before any dispatch or state mutation.
#[derive(Debug, Clone, Error)]
pub enum ToolCallError {
    #[error("no provider registered for server `{0}`")]
    UnknownServer(ToolServerKind),
    #[error("server `{server}` has no tool `{tool}`")]
    UnknownTool { server: ToolServerKind, tool: String },
    #[error("invalid arguments for `{server}/{tool}`: {reason}")]
    InvalidArguments {
        server: ToolServerKind,
        tool: String,
        reason: String,
    },
}

/// Uniform invocation interface over the capability providers. `check`
/// validates a call against the provider's declared schema without running
/// it; `call` always resolves to an envelope -- provider failures and
/// timeouts are normalized, never surfaced as `Err`.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    fn check(&self, call: &ToolCall) -> Result<(), ToolCallError>;
    async fn call(&self, call: ToolCall) -> ToolOutcome;
}

// Provider argument/result schemas. Field names are camelCase on the wire,
// matching the documented external interface shapes.

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum WaitCondition {
    Load,
    Domcontentloaded,
    Networkidle0,
    Networkidle2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserNavigateArgs {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<WaitCondition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserScreenshotArgs {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserScrapeArgs {
    pub url: String,
    /// Named CSS selectors; keys name the extracted fields.
    pub selectors: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchArgs {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    #[default]
    Utf8,
    Base64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemReadArgs {
    pub path: String,
    #[serde(default)]
    pub encoding: TextEncoding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemWriteArgs {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: TextEncoding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfExtractArgs {
    /// File path or base64 payload.
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_tables: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfPageImage {
    pub page: u32,
    /// Base64.
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfExtractResult {
    pub text: String,
    pub pages: u32,
    #[serde(default)]
    pub metadata: PdfMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<PdfPageImage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrArgs {
    /// Base64 payload or URL.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrBlock {
    pub text: String,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub blocks: Vec<OcrBlock>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_match_documented_shapes() {
        let args = BrowserScreenshotArgs {
            url: "https://example.com".into(),
            selector: None,
            full_page: Some(true),
            viewport: Some(Viewport {
                width: 1280,
                height: 720,
            }),
        };
        let value = serde_json::to_value(&args).expect("serialize");
        assert_eq!(value["fullPage"], json!(true));
        assert_eq!(value["viewport"]["width"], json!(1280));

        let server = serde_json::to_value(ToolServerKind::PdfExtractor).expect("serialize");
        assert_eq!(server, json!("pdf-extractor"));
    }

    #[test]
    fn fetch_args_accept_sparse_payloads() {
        let args: FetchArgs =
            serde_json::from_value(json!({"url": "https://example.com"})).expect("deserialize");
        assert_eq!(args.method, None);
        assert!(
            serde_json::from_value::<FetchArgs>(json!({"method": "GET"})).is_err(),
            "url is mandatory"
        );
    }
}
