use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Started,
    MenuPresented,
    DigitReceived,
    Transferred,
    VoicemailRecorded,
    AppointmentNotified,
    Failed,
    Completed,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }
}

/// Durable record of one call, keyed by the carrier's call id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub external_call_id: String,
    pub from_number: String,
    pub to_number: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    /// Captured when the call started; never recomputed mid-call.
    pub is_after_hours: bool,
    /// The menu whose welcome message the caller heard last.
    pub current_menu_id: String,
    pub invalid_attempts: u32,
    pub transfer_destination: Option<String>,
    pub recording_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields to overwrite alongside a status change. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub current_menu_id: Option<String>,
    pub invalid_attempts: Option<u32>,
    pub transfer_destination: Option<String>,
    pub recording_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            updated_at: Some(now),
            ..Default::default()
        }
    }

    pub fn with_menu(mut self, menu_id: impl Into<String>) -> Self {
        self.current_menu_id = Some(menu_id.into());
        self
    }

    pub fn with_invalid_attempts(mut self, attempts: u32) -> Self {
        self.invalid_attempts = Some(attempts);
        self
    }

    pub fn with_transfer_destination(mut self, destination: impl Into<String>) -> Self {
        self.transfer_destination = Some(destination.into());
        self
    }

    pub fn with_recording_url(mut self, url: impl Into<String>) -> Self {
        self.recording_url = Some(url.into());
        self
    }

    fn apply(self, session: &mut CallSession, status: Option<CallStatus>) {
        if let Some(status) = status {
            session.status = status;
        }
        if let Some(menu) = self.current_menu_id {
            session.current_menu_id = menu;
        }
        if let Some(attempts) = self.invalid_attempts {
            session.invalid_attempts = attempts;
        }
        if self.transfer_destination.is_some() {
            session.transfer_destination = self.transfer_destination;
        }
        if self.recording_url.is_some() {
            session.recording_url = self.recording_url;
        }
        session.updated_at = self.updated_at.unwrap_or_else(Utc::now);
    }
}

/// Storage for [`CallSession`]s. Writes are independent and last-write-wins;
/// sessions are never deleted.
#[async_trait]
pub trait CallSessionStore: Send + Sync {
    /// Inserts a session, replacing any earlier one with the same id.
    async fn create(&self, session: CallSession) -> Result<()>;
    /// `status = None` only applies `update`.
    async fn update_status(
        &self,
        external_call_id: &str,
        status: Option<CallStatus>,
        update: SessionUpdate,
    ) -> Result<()>;
    async fn get(&self, external_call_id: &str) -> Result<Option<CallSession>>;
}

#[derive(Default)]
pub struct MemoryCallSessionStore {
    sessions: RwLock<HashMap<String, CallSession>>,
}

impl MemoryCallSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl CallSessionStore for MemoryCallSessionStore {
    async fn create(&self, session: CallSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.external_call_id.clone(), session);
        Ok(())
    }

    async fn update_status(
        &self,
        external_call_id: &str,
        status: Option<CallStatus>,
        update: SessionUpdate,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(external_call_id)
            .ok_or_else(|| anyhow::anyhow!("call session {} not found", external_call_id))?;
        update.apply(session, status);
        Ok(())
    }

    async fn get(&self, external_call_id: &str) -> Result<Option<CallSession>> {
        Ok(self.sessions.read().await.get(external_call_id).cloned())
    }
}
