mod providers;

pub use providers::{
    BrowserProvider, FetchProvider, FilesystemProvider, OcrProvider, PdfExtractProvider,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use core_types::{ToolCall, ToolCallError, ToolGateway, ToolOutcome, ToolServerKind};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// One capability provider behind the gateway. Implementations are fully
/// swappable; callers only ever see the uniform envelope.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn server(&self) -> ToolServerKind;
    fn tools(&self) -> &'static [&'static str];
    /// Schema check only; must not perform any I/O.
    fn validate(&self, tool: &str, args: &Value) -> Result<(), ToolCallError>;
    async fn call(&self, tool: &str, args: Value) -> Result<Value>;
}

pub(crate) fn parse_args<T: DeserializeOwned>(
    server: ToolServerKind,
    tool: &str,
    args: &Value,
) -> Result<T, ToolCallError> {
    serde_json::from_value(args.clone()).map_err(|err| ToolCallError::InvalidArguments {
        server,
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}

/// Capability-indexed dispatch table. Validates the argument payload
/// against the provider schema before dispatch, bounds every call with a
/// timeout, and normalizes provider errors into the uniform envelope.
pub struct ProviderGateway {
    providers: IndexMap<ToolServerKind, Arc<dyn ToolProvider>>,
    call_timeout: Duration,
}

impl ProviderGateway {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            providers: IndexMap::new(),
            call_timeout,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) {
        self.providers.insert(provider.server(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn servers(&self) -> impl Iterator<Item = ToolServerKind> + '_ {
        self.providers.keys().copied()
    }
}

#[async_trait]
impl ToolGateway for ProviderGateway {
    fn check(&self, call: &ToolCall) -> Result<(), ToolCallError> {
        let provider = self
            .providers
            .get(&call.server)
            .ok_or(ToolCallError::UnknownServer(call.server))?;
        if !provider.tools().contains(&call.tool.as_str()) {
            return Err(ToolCallError::UnknownTool {
                server: call.server,
                tool: call.tool.clone(),
            });
        }
        provider.validate(&call.tool, &call.arguments)
    }

    async fn call(&self, call: ToolCall) -> ToolOutcome {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        if let Err(err) = self.check(&call) {
            return ToolOutcome::failed(err.to_string(), elapsed(start));
        }
        let ToolCall {
            server,
            tool,
            arguments,
        } = call;
        let Some(provider) = self.providers.get(&server) else {
            // check() already covers this; kept so the envelope contract
            // holds even if the table changes between check and call.
            return ToolOutcome::failed(
                ToolCallError::UnknownServer(server).to_string(),
                elapsed(start),
            );
        };

        debug!(%server, %tool, "dispatching tool call");
        match tokio::time::timeout(self.call_timeout, provider.call(&tool, arguments)).await {
            Ok(Ok(data)) => ToolOutcome::ok(data, elapsed(start)),
            Ok(Err(err)) => {
                warn!(%server, %tool, error = %err, "tool call failed");
                ToolOutcome::failed(format!("{err:#}"), elapsed(start))
            }
            Err(_) => {
                warn!(%server, %tool, timeout_ms = self.call_timeout.as_millis() as u64, "tool call timed out");
                ToolOutcome::failed(
                    format!(
                        "call to `{server}/{tool}` timed out after {}ms",
                        self.call_timeout.as_millis()
                    ),
                    elapsed(start),
                )
            }
        }
    }
}
