//! Cross-context request/response contract between the page side and the
//! background side. Transport-agnostic; every call settles within the
//! caller's own deadline even if the other side is gone.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::gateway::Gateway;
use crate::translate::ollama::ModelCatalog;
use crate::translate::{
    ErrorKind, TranslateError, TranslationBackend, TranslationRequest, AUTO_LANG,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    Translate {
        text: String,
        #[serde(rename = "sourceLang", default, skip_serializing_if = "Option::is_none")]
        source_lang: Option<String>,
        #[serde(rename = "targetLang", default, skip_serializing_if = "Option::is_none")]
        target_lang: Option<String>,
    },
    Ping,
    /// Models installed on the configured local endpoint.
    FetchModels,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
}

impl Response {
    pub fn translated(translation: String) -> Self {
        Self {
            success: true,
            translation: Some(translation),
            ..Self::default()
        }
    }

    pub fn failed(error: &TranslateError) -> Self {
        Self {
            success: false,
            error: Some(error.detail()),
            error_kind: Some(error.kind()),
            error_code: error.code().map(String::from),
            ..Self::default()
        }
    }

    pub fn models(models: Vec<String>) -> Self {
        Self {
            success: true,
            models: Some(models),
            ..Self::default()
        }
    }

    pub fn pong() -> Self {
        Self {
            success: true,
            message: Some("background is alive".into()),
            ..Self::default()
        }
    }

    /// Back to the error taxonomy. A failure without a kind reads as a
    /// backend error carrying the remote text.
    pub fn into_translation(self) -> Result<String, TranslateError> {
        if self.success {
            return self
                .translation
                .ok_or_else(|| TranslateError::InvalidResponse("reply has no translation".into()));
        }
        Err(self.into_error())
    }

    pub fn into_models(self) -> Result<Vec<String>, TranslateError> {
        if self.success {
            return self
                .models
                .ok_or_else(|| TranslateError::InvalidResponse("reply has no model list".into()));
        }
        Err(self.into_error())
    }

    fn into_error(self) -> TranslateError {
        let detail = self.error.unwrap_or_else(|| "unknown error".into());
        TranslateError::from_parts(
            self.error_kind.unwrap_or(ErrorKind::Backend),
            detail,
            self.error_code,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("remote context disconnected")]
    Disconnected,
}

impl From<RpcError> for TranslateError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Timeout(_) => TranslateError::Timeout,
            RpcError::Disconnected => TranslateError::Connectivity(e.to_string()),
        }
    }
}

/// Delivers one request and yields its reply. Deadlines are the caller's job.
pub trait Transport: Send + Sync {
    fn send(&self, id: String, request: Request) -> BoxFuture<'_, Result<Response, RpcError>>;
}

/// One request in flight over a [`ChannelTransport`].
pub struct Envelope {
    pub id: String,
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// In-process transport over a tokio channel.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, id: String, request: Request) -> BoxFuture<'_, Result<Response, RpcError>> {
        Box::pin(async move {
            let (reply, rx) = oneshot::channel();
            self.tx
                .send(Envelope { id, request, reply })
                .await
                .map_err(|_| RpcError::Disconnected)?;
            rx.await.map_err(|_| RpcError::Disconnected)
        })
    }
}

/// Background-side loop: answers every envelope on its own task. Ends when
/// all transports are dropped.
pub fn serve(mut rx: mpsc::Receiver<Envelope>, handler: Arc<MessageHandler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("message_loop_started");
        while let Some(envelope) = rx.recv().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let response = handler.handle(envelope.request).await;
                if envelope.reply.send(response).is_err() {
                    debug!(id = %envelope.id, "caller_gone_before_reply");
                }
            });
        }
        info!("message_loop_stopped");
    })
}

/// Background-side request handler.
pub struct MessageHandler {
    gateway: Arc<Gateway>,
    catalog: Option<Arc<dyn ModelCatalog>>,
}

impl MessageHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            catalog: None,
        }
    }

    /// Answer `fetchModels` from `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::pong(),
            Request::FetchModels => {
                let Some(catalog) = &self.catalog else {
                    return Response::failed(&TranslateError::Configuration(
                        "model listing is not available".into(),
                    ));
                };
                let endpoint = self.gateway.settings().current().backend_endpoint;
                match catalog.list_models(&endpoint).await {
                    Ok(models) => {
                        debug!(count = models.len(), "models_listed");
                        Response::models(models)
                    }
                    Err(e) => {
                        warn!(error = %e, "fetch_models_failed");
                        Response::failed(&e)
                    }
                }
            }
            Request::Translate {
                text,
                source_lang,
                target_lang,
            } => {
                let settings = self.gateway.settings().current();
                let request = TranslationRequest::new(
                    &text,
                    source_lang.unwrap_or_else(|| AUTO_LANG.into()),
                    target_lang.unwrap_or(settings.target_lang),
                );
                let outcome = match request {
                    Ok(request) => self.gateway.translate(&request).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(translation) => Response::translated(translation),
                    Err(e) => {
                        warn!(error = %e, "background_translate_failed");
                        Response::failed(&e)
                    }
                }
            }
        }
    }
}

/// Caller side with its own per-call deadline.
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            transport,
            timeout,
            metrics,
        }
    }

    pub async fn call(&self, request: Request) -> Result<Response, RpcError> {
        let id = uuid::Uuid::new_v4().to_string();
        let span = self.metrics.span(metric_names::RPC_ROUND_TRIP);
        let result = match tokio::time::timeout(self.timeout, self.transport.send(id.clone(), request)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(self.timeout)),
        };
        let elapsed_ms = span.finish();
        match &result {
            Ok(_) => debug!(id = %id, elapsed_ms, "rpc_replied"),
            Err(e) => warn!(id = %id, elapsed_ms, error = %e, "rpc_failed"),
        }
        result
    }

    /// Liveness check; never touches the network on the remote side.
    pub async fn ping(&self) -> Result<(), RpcError> {
        self.call(Request::Ping).await.map(|_| ())
    }

    pub async fn fetch_models(&self) -> Result<Vec<String>, TranslateError> {
        self.call(Request::FetchModels).await?.into_models()
    }

    pub async fn translate(
        &self,
        text: &str,
        source_lang: Option<&str>,
        target_lang: Option<&str>,
    ) -> Result<String, TranslateError> {
        let response = self
            .call(Request::Translate {
                text: text.to_string(),
                source_lang: source_lang.map(String::from),
                target_lang: target_lang.map(String::from),
            })
            .await?;
        response.into_translation()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Page-side backend that forwards to the background over RPC, keeping
/// the error kinds intact for the circuit.
pub struct RemoteBackend {
    client: Arc<RpcClient>,
}

impl RemoteBackend {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self { client }
    }
}

impl TranslationBackend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn timeout(&self) -> Duration {
        self.client.timeout()
    }

    fn translate<'a>(
        &'a self,
        request: &'a TranslationRequest,
        _settings: &'a Settings,
    ) -> BoxFuture<'a, Result<String, TranslateError>> {
        Box::pin(self.client.translate(
            request.source_text(),
            Some(request.source_lang.as_str()),
            Some(request.target_lang.as_str()),
        ))
    }
}
