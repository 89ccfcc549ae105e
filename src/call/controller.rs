//! IVR controller: turns carrier webhooks into directive lists.
//!
//! # State Machine
//!
//! ```text
//! started → menu_presented ⇄ (invalid / timeout, bounded by max_retries)
//!                │
//!                ├─ transfer ────→ transferred ──┐
//!                ├─ voicemail ───→ digit_received → voicemail_recorded ──┐
//!                ├─ appointment ─→ appointment_notified ──────────────────┤
//!                └─ submenu ─────→ menu_presented (submenu)               │
//!                                                          completed | failed
//! ```
//!
//! Every webhook is an independent request. Whatever must survive between
//! them (the presented menu, the after-hours snapshot, retry counts) lives
//! in the [`CallSessionStore`]. Store and dispatcher failures are logged
//! and never change what the caller hears; any other failure while
//! resolving config, calendar or menu yields
//! [`DirectiveCompiler::fallback`].

use super::config_store::{ConfigStore, MemoryConfigStore};
use super::directive::{CallbackUrls, Directive, DirectiveCompiler, DirectiveList};
use super::dispatch::{Dispatcher, LogDispatcher, SideEffect};
use super::ivr_config::{IvrConfig, Menu, MenuAction, MenuOption};
use super::menu::MenuCatalog;
use super::session::{
    CallDirection, CallSession, CallSessionStore, CallStatus, MemoryCallSessionStore,
    SessionUpdate,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on any single session store call made while the carrier
/// is waiting for directives.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(2);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Call-progress notifications sent by the carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallProgress {
    Started,
    Ringing,
    Answered,
    Transferred,
    RecordingFinished { recording_url: Option<String> },
    Completed,
    Failed,
    Busy,
    Timeout,
    Rejected,
    Cancelled,
    Unanswered,
}

impl CallProgress {
    /// `None` for statuses this service does not track.
    pub fn parse(status: &str, recording_url: Option<String>) -> Option<Self> {
        let progress = match status.to_lowercase().as_str() {
            "started" => CallProgress::Started,
            "ringing" => CallProgress::Ringing,
            "answered" => CallProgress::Answered,
            "transfer" | "transferred" => CallProgress::Transferred,
            "recording" | "recording_finished" | "record" => {
                CallProgress::RecordingFinished { recording_url }
            }
            "completed" => CallProgress::Completed,
            "failed" => CallProgress::Failed,
            "busy" => CallProgress::Busy,
            "timeout" => CallProgress::Timeout,
            "rejected" => CallProgress::Rejected,
            "cancelled" | "canceled" => CallProgress::Cancelled,
            "unanswered" => CallProgress::Unanswered,
            _ => return None,
        };
        Some(progress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryCause {
    Timeout,
    Invalid,
}

pub struct IvrController {
    config_store: Arc<dyn ConfigStore>,
    sessions: Arc<dyn CallSessionStore>,
    dispatcher: Arc<dyn Dispatcher>,
    compiler: DirectiveCompiler,
    default_config: Arc<IvrConfig>,
    clock: Clock,
}

pub struct IvrControllerBuilder {
    config_store: Option<Arc<dyn ConfigStore>>,
    sessions: Option<Arc<dyn CallSessionStore>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    compiler: Option<DirectiveCompiler>,
    default_config: Option<IvrConfig>,
    clock: Option<Clock>,
}

impl IvrControllerBuilder {
    pub fn new() -> Self {
        Self {
            config_store: None,
            sessions: None,
            dispatcher: None,
            compiler: None,
            default_config: None,
            clock: None,
        }
    }

    pub fn with_config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn CallSessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_compiler(mut self, compiler: DirectiveCompiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// The config used when a tenant has none, or an invalid one.
    pub fn with_default_config(mut self, config: IvrConfig) -> Self {
        self.default_config = Some(config);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<IvrController> {
        let default_config = self.default_config.unwrap_or_default();
        default_config
            .validate()
            .map_err(|e| anyhow!("default IVR config is invalid: {}", e))?;

        Ok(IvrController {
            config_store: self
                .config_store
                .unwrap_or_else(|| Arc::new(MemoryConfigStore::new())),
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(MemoryCallSessionStore::new())),
            dispatcher: self.dispatcher.unwrap_or_else(|| Arc::new(LogDispatcher)),
            compiler: self.compiler.unwrap_or_else(|| {
                DirectiveCompiler::new(CallbackUrls::from_base("http://localhost:8080"))
            }),
            default_config: Arc::new(default_config),
            clock: self.clock.unwrap_or_else(|| Arc::new(Utc::now)),
        })
    }
}

impl Default for IvrControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IvrController {
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// First webhook of an inbound call. Always returns a non-empty list.
    pub async fn handle_call_started(&self, from: &str, to: &str, call_id: &str) -> DirectiveList {
        let outcome = AssertUnwindSafe(self.call_started(from, to, call_id).map(Ok))
            .catch_unwind()
            .await;
        settle(call_id, "call_started", outcome)
    }

    /// A digit (or an input timeout when `digit` is empty) for the menu the
    /// caller last heard. Always returns a non-empty list.
    pub async fn handle_digit_collected(
        &self,
        from: &str,
        to: &str,
        digit: Option<&str>,
        call_id: &str,
    ) -> DirectiveList {
        let outcome = AssertUnwindSafe(self.digit_collected(from, to, digit, call_id))
            .catch_unwind()
            .await;
        settle(call_id, "digit_collected", outcome)
    }

    /// Carrier-side notifications. Nothing is returned to the carrier.
    pub async fn handle_call_progress(&self, call_id: &str, progress: CallProgress) {
        let outcome = AssertUnwindSafe(self.call_progress(call_id, progress))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            error!(
                call_id,
                "call progress handler panicked: {}",
                panic_message(panic.as_ref())
            );
        }
    }

    async fn call_started(&self, from: &str, to: &str, call_id: &str) -> DirectiveList {
        let config = self.load_config(to).await;
        let now = self.now();
        let catalog = MenuCatalog::new(&config);
        let is_after_hours = catalog.is_after_hours(now);

        if !config.enabled {
            info!(call_id, from, to, "IVR disabled, routing call to operator");
            let mut session = new_session(from, to, call_id, is_after_hours, &config.main_menu, now);
            session.status = CallStatus::Transferred;
            session.transfer_destination = config.transfer_numbers.operator.clone();
            self.persist_new(session).await;
            return self
                .compiler
                .compile_disabled_fallback(&config.transfer_numbers, &config.voice_settings);
        }

        let menu = catalog.menu_for(is_after_hours);
        info!(
            call_id,
            from,
            to,
            menu = %menu.id,
            is_after_hours,
            "presenting menu"
        );
        self.persist_new(new_session(from, to, call_id, is_after_hours, menu, now))
            .await;
        self.compiler
            .compile_menu_presentation(menu, &config.voice_settings)
    }

    async fn digit_collected(
        &self,
        from: &str,
        to: &str,
        digit: Option<&str>,
        call_id: &str,
    ) -> Result<DirectiveList> {
        let config = self.load_config(to).await;
        let now = self.now();

        if !config.enabled {
            info!(call_id, "IVR disabled mid-call, routing call to operator");
            self.record_transfer(call_id, config.transfer_numbers.operator.as_deref(), now)
                .await;
            return Ok(self
                .compiler
                .compile_disabled_fallback(&config.transfer_numbers, &config.voice_settings));
        }

        let catalog = MenuCatalog::new(&config);
        let session = self.load_session(call_id).await;
        let menu = match session.as_ref() {
            Some(session) => catalog
                .menu_by_id(&session.current_menu_id)
                .unwrap_or_else(|| catalog.menu_for(session.is_after_hours)),
            None => {
                warn!(call_id, "no call session, resolving against the active menu");
                catalog.active_menu(now)
            }
        };
        let attempts = session.as_ref().map(|s| s.invalid_attempts).unwrap_or(0);

        let Some(digit) = digit.map(str::trim).filter(|d| !d.is_empty()) else {
            debug!(call_id, menu = %menu.id, "input timed out");
            return Ok(self
                .retry(&config, menu, call_id, attempts, RetryCause::Timeout, now)
                .await);
        };

        let Some(option) = MenuCatalog::resolve_option(menu, digit) else {
            info!(call_id, menu = %menu.id, digit, "invalid selection");
            return Ok(self
                .retry(&config, menu, call_id, attempts, RetryCause::Invalid, now)
                .await);
        };

        info!(
            call_id,
            menu = %menu.id,
            digit,
            action = option.action.as_str(),
            "menu option selected"
        );
        self.select_option(&config, &catalog, option, from, to, call_id, now)
            .await
    }

    async fn retry(
        &self,
        config: &IvrConfig,
        menu: &Menu,
        call_id: &str,
        previous_attempts: u32,
        cause: RetryCause,
        now: DateTime<Utc>,
    ) -> DirectiveList {
        let attempts = previous_attempts + 1;
        let voice = &config.voice_settings;

        if attempts > menu.max_retries {
            warn!(call_id, menu = %menu.id, attempts, "retries exhausted");
            let update = SessionUpdate::at(now).with_invalid_attempts(attempts);
            match config.transfer_numbers.operator.as_deref() {
                Some(operator) => {
                    self.persist_update(
                        call_id,
                        Some(CallStatus::Transferred),
                        update.with_transfer_destination(operator),
                    )
                    .await
                }
                None => {
                    self.persist_update(call_id, Some(CallStatus::Completed), update)
                        .await
                }
            }
            return self
                .compiler
                .compile_retries_exhausted(&config.transfer_numbers, voice);
        }

        self.persist_update(
            call_id,
            Some(CallStatus::MenuPresented),
            SessionUpdate::at(now)
                .with_menu(&menu.id)
                .with_invalid_attempts(attempts),
        )
        .await;
        match cause {
            RetryCause::Timeout => self.compiler.compile_input_timeout(menu, voice),
            RetryCause::Invalid => self.compiler.compile_invalid_input(menu, voice),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn select_option(
        &self,
        config: &IvrConfig,
        catalog: &MenuCatalog<'_>,
        option: &MenuOption,
        from: &str,
        to: &str,
        call_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DirectiveList> {
        let voice = &config.voice_settings;
        let flags = &config.feature_flags;

        match &option.action {
            MenuAction::Submenu => {
                let target = option.submenu_id.as_deref().unwrap_or_default();
                let submenu = catalog
                    .menu_by_id(target)
                    .ok_or_else(|| anyhow!("submenu '{}' is not configured", target))?;
                self.persist_update(
                    call_id,
                    Some(CallStatus::MenuPresented),
                    SessionUpdate::at(now)
                        .with_menu(&submenu.id)
                        .with_invalid_attempts(0),
                )
                .await;
                Ok(self.compiler.compile_submenu(option, submenu, voice))
            }
            MenuAction::Voicemail if !flags.voicemail_enabled => {
                info!(call_id, "voicemail disabled, routing call to operator");
                self.record_transfer(call_id, config.transfer_numbers.operator.as_deref(), now)
                    .await;
                Ok(self
                    .compiler
                    .compile_disabled_fallback(&config.transfer_numbers, voice))
            }
            MenuAction::Transfer => {
                let mut directives = self.compiler.compile_option(option, voice);
                if flags.call_recording_enabled {
                    directives.insert(0, self.compiler.compile_call_recording());
                }
                self.record_transfer(call_id, option.destination.as_deref(), now)
                    .await;
                Ok(directives)
            }
            MenuAction::Voicemail => {
                let mut directives = self.compiler.compile_option(option, voice);
                if flags.transcription_enabled {
                    for directive in directives.iter_mut() {
                        if let Directive::Record(record) = directive {
                            record.transcription = true;
                        }
                    }
                }
                self.persist_update(
                    call_id,
                    Some(CallStatus::DigitReceived),
                    SessionUpdate::at(now),
                )
                .await;
                Ok(directives)
            }
            MenuAction::Appointment => {
                let directives = self.compiler.compile_option(option, voice);
                let status = if flags.appointment_scheduling_enabled {
                    self.dispatch(SideEffect::SendSchedulingLink {
                        to: from.to_string(),
                        from: to.to_string(),
                        call_id: call_id.to_string(),
                    });
                    CallStatus::AppointmentNotified
                } else {
                    debug!(call_id, "appointment scheduling disabled, no link sent");
                    CallStatus::DigitReceived
                };
                self.persist_update(call_id, Some(status), SessionUpdate::at(now))
                    .await;
                Ok(directives)
            }
            MenuAction::Queue | MenuAction::Other(_) => {
                self.persist_update(
                    call_id,
                    Some(CallStatus::DigitReceived),
                    SessionUpdate::at(now),
                )
                .await;
                Ok(self.compiler.compile_option(option, voice))
            }
        }
    }

    async fn call_progress(&self, call_id: &str, progress: CallProgress) {
        let now = self.now();
        match progress {
            CallProgress::Started | CallProgress::Ringing => {
                debug!(call_id, ?progress, "call progress");
            }
            CallProgress::Answered => {
                // the session may not exist yet, the answer webhook can lag behind
                if let Err(e) = self
                    .sessions
                    .update_status(call_id, None, SessionUpdate::at(now))
                    .await
                {
                    debug!(call_id, "answered before session was created: {}", e);
                }
            }
            CallProgress::Transferred => {
                let session = self.load_session(call_id).await;
                self.persist_update(
                    call_id,
                    Some(CallStatus::Transferred),
                    SessionUpdate::at(now),
                )
                .await;
                if let Some(CallSession {
                    from_number,
                    transfer_destination: Some(destination),
                    ..
                }) = session
                {
                    self.dispatch(SideEffect::CallTransferred {
                        call_id: call_id.to_string(),
                        from: from_number,
                        destination,
                    });
                }
            }
            CallProgress::RecordingFinished { recording_url } => {
                let session = self.load_session(call_id).await;
                let mut update = SessionUpdate::at(now);
                if let Some(url) = recording_url.as_deref() {
                    update = update.with_recording_url(url);
                }

                // a transfer destination is only set on calls that left the IVR,
                // so their recordings are whole-call recordings, not voicemails
                let is_call_recording = session
                    .as_ref()
                    .is_some_and(|s| s.transfer_destination.is_some());
                if is_call_recording {
                    debug!(call_id, "whole-call recording finished");
                    self.persist_update(call_id, None, update).await;
                    return;
                }

                // the hangup event may arrive before the recording callback
                let status = match session.as_ref() {
                    Some(s) if s.status.is_terminal() => None,
                    _ => Some(CallStatus::VoicemailRecorded),
                };
                self.persist_update(call_id, status, update).await;
                match (session, recording_url) {
                    (Some(session), Some(recording_url)) => {
                        self.dispatch(SideEffect::VoicemailRecorded {
                            call_id: call_id.to_string(),
                            from: session.from_number,
                            recording_url,
                        });
                    }
                    _ => warn!(
                        call_id,
                        "recording finished without session or url, notification skipped"
                    ),
                }
            }
            CallProgress::Completed => {
                info!(call_id, "call completed");
                self.persist_update(call_id, Some(CallStatus::Completed), SessionUpdate::at(now))
                    .await;
            }
            CallProgress::Failed
            | CallProgress::Busy
            | CallProgress::Timeout
            | CallProgress::Rejected
            | CallProgress::Cancelled
            | CallProgress::Unanswered => {
                info!(call_id, ?progress, "call ended without completing");
                self.persist_update(call_id, Some(CallStatus::Failed), SessionUpdate::at(now))
                    .await;
            }
        }
    }

    async fn load_config(&self, phone_number: &str) -> Arc<IvrConfig> {
        match self.config_store.get_ivr_config(phone_number).await {
            Ok(config) => match config.validate() {
                Ok(()) => Arc::new(config),
                Err(e) => {
                    warn!(
                        phone_number,
                        "invalid IVR config, using system default: {}", e
                    );
                    self.default_config.clone()
                }
            },
            Err(e) => {
                debug!(phone_number, "no IVR config, using system default: {}", e);
                self.default_config.clone()
            }
        }
    }

    async fn load_session(&self, call_id: &str) -> Option<CallSession> {
        match tokio::time::timeout(STORE_TIMEOUT, self.sessions.get(call_id)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(call_id, "failed to load call session: {}", e);
                None
            }
            Err(_) => {
                warn!(call_id, "timed out loading call session");
                None
            }
        }
    }

    async fn persist_new(&self, session: CallSession) {
        let call_id = session.external_call_id.clone();
        match tokio::time::timeout(STORE_TIMEOUT, self.sessions.create(session)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(call_id = %call_id, "failed to persist call session: {}", e),
            Err(_) => warn!(call_id = %call_id, "timed out persisting call session"),
        }
    }

    async fn persist_update(
        &self,
        call_id: &str,
        status: Option<CallStatus>,
        update: SessionUpdate,
    ) {
        let write = self.sessions.update_status(call_id, status, update);
        match tokio::time::timeout(STORE_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(call_id, ?status, "failed to update call session: {}", e),
            Err(_) => warn!(call_id, ?status, "timed out updating call session"),
        }
    }

    async fn record_transfer(&self, call_id: &str, destination: Option<&str>, now: DateTime<Utc>) {
        let mut update = SessionUpdate::at(now);
        if let Some(destination) = destination {
            update = update.with_transfer_destination(destination);
        }
        self.persist_update(call_id, Some(CallStatus::Transferred), update)
            .await;
    }

    fn dispatch(&self, effect: SideEffect) {
        let action = effect.action_type();
        let call_id = effect.call_id().to_string();
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.dispatcher.dispatch(effect))) {
            Ok(Ok(())) => debug!(action, call_id = %call_id, "side effect queued"),
            Ok(Err(e)) => error!(action, call_id = %call_id, "failed to queue side effect: {}", e),
            Err(panic) => error!(
                action,
                call_id = %call_id,
                "dispatcher panicked: {}",
                panic_message(panic.as_ref())
            ),
        }
    }
}

fn new_session(
    from: &str,
    to: &str,
    call_id: &str,
    is_after_hours: bool,
    menu: &Menu,
    now: DateTime<Utc>,
) -> CallSession {
    CallSession {
        external_call_id: call_id.to_string(),
        from_number: from.to_string(),
        to_number: to.to_string(),
        direction: CallDirection::Inbound,
        status: CallStatus::MenuPresented,
        is_after_hours,
        current_menu_id: menu.id.clone(),
        invalid_attempts: 0,
        transfer_destination: None,
        recording_url: None,
        started_at: now,
        updated_at: now,
    }
}

fn settle(
    call_id: &str,
    stage: &str,
    outcome: std::thread::Result<Result<DirectiveList>>,
) -> DirectiveList {
    match outcome {
        Ok(Ok(directives)) if !directives.is_empty() => directives,
        Ok(Ok(_)) => {
            error!(call_id, stage, "no directives produced, using fallback");
            DirectiveCompiler::fallback()
        }
        Ok(Err(e)) => {
            error!(call_id, stage, "IVR failure, using fallback: {:#}", e);
            DirectiveCompiler::fallback()
        }
        Err(panic) => {
            error!(
                call_id,
                stage,
                "IVR panicked, using fallback: {}",
                panic_message(panic.as_ref())
            );
            DirectiveCompiler::fallback()
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
