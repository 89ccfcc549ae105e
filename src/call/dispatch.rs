//! Fire-and-forget side effects (text messages, voicemail and transfer
//! notifications).
//!
//! The controller hands a [`SideEffect`] to a [`Dispatcher`] and moves on.
//! [`DispatchManager`] queues effects on an unbounded channel and runs each
//! one through its handler on a separate task, so neither latency nor
//! failure of the downstream service reaches the carrier response.

use crate::config::DispatchConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SideEffect {
    /// Text the caller a link to book an appointment.
    #[serde(rename_all = "camelCase")]
    SendSchedulingLink {
        to: String,
        from: String,
        call_id: String,
    },
    #[serde(rename_all = "camelCase")]
    VoicemailRecorded {
        call_id: String,
        from: String,
        recording_url: String,
    },
    #[serde(rename_all = "camelCase")]
    CallTransferred {
        call_id: String,
        from: String,
        destination: String,
    },
}

impl SideEffect {
    pub fn action_type(&self) -> &'static str {
        match self {
            SideEffect::SendSchedulingLink { .. } => "send_scheduling_link",
            SideEffect::VoicemailRecorded { .. } => "voicemail_recorded",
            SideEffect::CallTransferred { .. } => "call_transferred",
        }
    }

    pub fn call_id(&self) -> &str {
        match self {
            SideEffect::SendSchedulingLink { call_id, .. }
            | SideEffect::VoicemailRecorded { call_id, .. }
            | SideEffect::CallTransferred { call_id, .. } => call_id,
        }
    }
}

/// Accepts a side effect without waiting for it to run. An error only
/// means the effect could not be queued.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, effect: SideEffect) -> Result<()>;
}

/// Logs effects and drops them.
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn dispatch(&self, effect: SideEffect) -> Result<()> {
        info!(
            action = effect.action_type(),
            call_id = effect.call_id(),
            "side effect dropped, no dispatcher configured"
        );
        Ok(())
    }
}

pub type SideEffectSender = tokio::sync::mpsc::UnboundedSender<SideEffect>;
pub type SideEffectReceiver = tokio::sync::mpsc::UnboundedReceiver<SideEffect>;

impl Dispatcher for SideEffectSender {
    fn dispatch(&self, effect: SideEffect) -> Result<()> {
        self.send(effect)
            .map_err(|e| anyhow!("dispatch queue closed, dropped {}", e.0.action_type()))
    }
}

pub type FnHandleSideEffect = Arc<
    Box<
        dyn Fn(Arc<DispatchConfig>, SideEffect) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
            + Send
            + Sync,
    >,
>;

pub struct DispatchManager {
    pub sender: SideEffectSender,
    config: Arc<DispatchConfig>,
    cancel_token: CancellationToken,
    receiver: SideEffectReceiver,
    handler_fn: FnHandleSideEffect,
}

pub struct DispatchManagerBuilder {
    cancel_token: Option<CancellationToken>,
    config: Option<DispatchConfig>,
    handler_fn: Option<FnHandleSideEffect>,
}

impl DispatchManagerBuilder {
    pub fn new() -> Self {
        Self {
            cancel_token: None,
            config: None,
            handler_fn: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_handler(mut self, handler: FnHandleSideEffect) -> Self {
        self.handler_fn = Some(handler);
        self
    }

    pub fn build(self) -> DispatchManager {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        DispatchManager {
            sender,
            config: Arc::new(self.config.unwrap_or_default()),
            cancel_token: self.cancel_token.unwrap_or_default(),
            receiver,
            handler_fn: self
                .handler_fn
                .unwrap_or_else(|| Arc::new(Box::new(DispatchManager::default_handler))),
        }
    }
}

impl Default for DispatchManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchManager {
    fn default_handler(
        config: Arc<DispatchConfig>,
        effect: SideEffect,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            match config.as_ref() {
                DispatchConfig::Log => {
                    info!(
                        action = effect.action_type(),
                        call_id = effect.call_id(),
                        payload = %serde_json::to_string(&effect)?,
                        "side effect"
                    );
                    Ok(())
                }
                DispatchConfig::Http {
                    url,
                    headers,
                    timeout_ms,
                } => {
                    Self::send_with_http(url, headers.as_ref(), *timeout_ms, &effect).await
                }
            }
        })
    }

    async fn send_with_http(
        url: &str,
        headers: Option<&std::collections::HashMap<String, String>>,
        timeout_ms: Option<u64>,
        effect: &SideEffect,
    ) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))
            .build()?;
        let mut request = client.post(url).json(effect);
        if let Some(headers) = headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "{} dispatch for {} rejected with {}",
                effect.action_type(),
                effect.call_id(),
                response.status()
            ));
        }
        info!(
            action = effect.action_type(),
            call_id = effect.call_id(),
            url,
            "side effect delivered"
        );
        Ok(())
    }

    pub async fn serve(&mut self) {
        let token = self.cancel_token.clone();
        select! {
            _ = self.cancel_token.cancelled() => {
                info!("DispatchManager cancelled");
            }
            _ = Self::recv_loop(
                token,
                self.config.clone(),
                self.handler_fn.clone(),
                &mut self.receiver,
            ) => {
                info!("DispatchManager receiver closed");
            }
        }
    }

    async fn recv_loop(
        cancel_token: CancellationToken,
        config: Arc<DispatchConfig>,
        handler_fn: FnHandleSideEffect,
        receiver: &mut SideEffectReceiver,
    ) {
        while let Some(effect) = receiver.recv().await {
            let cancel_token_ref = cancel_token.clone();
            let handler_ref = handler_fn.clone();
            let config_ref = config.clone();
            tokio::spawn(async move {
                let action = effect.action_type();
                let call_id = effect.call_id().to_string();
                select! {
                    _ = cancel_token_ref.cancelled() => {
                        warn!(action, call_id = %call_id, "side effect abandoned on shutdown");
                    }
                    r = handler_ref(config_ref, effect) => {
                        if let Err(e) = r {
                            error!(action, call_id = %call_id, "Failed to dispatch side effect: {}", e);
                        }
                    }
                }
            });
        }
    }
}
