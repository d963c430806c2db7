//! Credential and record persistence.
//!
//! The store is the only owner of portal sessions, OAuth states and staff
//! provider tokens. Nothing above this layer caches those records: each
//! authorization decision re-reads them, and every expiry comparison uses the
//! store's clock.
//!
//! Two implementations ship with the crate:
//! - [`PgStore`] backed by `PostgreSQL` through `sqlx` (see `sql/schema.sql`).
//! - [`MemoryStore`], an in-process double with a controllable clock, used by
//!   tests and local experiments.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

pub type StoreResult<T> = anyhow::Result<T>;

/// Shared store handle passed to every component at construction.
pub type SharedStore = Arc<dyn Store>;

/// Case row as seen by the portal (the case data model itself is owned elsewhere).
#[derive(Clone, Debug)]
pub struct CaseRecord {
    pub id: Uuid,
    pub reference: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StaffMember {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// A portal authentication row. `token_hash` is the SHA-256 of the bearer token.
#[derive(Clone, Debug)]
pub struct PortalSession {
    pub id: Uuid,
    pub case_id: Uuid,
    pub client_name: String,
    pub code: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub token_hash: Option<Vec<u8>>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A recorded verification attempt and the attempts inside the window, itself included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyAttempt {
    pub id: i64,
    pub attempts_in_window: i64,
}

/// Result of a successful code consumption.
#[derive(Clone, Debug)]
pub struct VerifiedSession {
    pub session_id: Uuid,
    pub case_id: Uuid,
    pub token_expires_at: DateTime<Utc>,
}

/// Authenticated session resolved from a bearer token.
#[derive(Clone, Debug)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub case_id: Uuid,
    pub token_expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewOAuthState {
    pub state: String,
    pub staff_member_id: Uuid,
    pub code_verifier: SecretString,
    pub redirect_after: String,
}

#[derive(Clone, Debug)]
pub struct OAuthStateRecord {
    pub state: String,
    pub staff_member_id: Uuid,
    pub code_verifier: SecretString,
    pub redirect_after: String,
    pub created_at: DateTime<Utc>,
}

/// Provider tokens to persist; `expires_at` is derived from the store clock.
#[derive(Clone, Debug)]
pub struct NewStaffTokens {
    pub staff_member_id: Uuid,
    pub external_user_id: String,
    pub email: String,
    pub display_name: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub scope: String,
    pub expires_in_seconds: i64,
}

#[derive(Clone, Debug)]
pub struct StaffOAuthTokens {
    pub staff_member_id: Uuid,
    pub external_user_id: String,
    pub email: String,
    pub display_name: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageSender {
    Client,
    Staff,
}

impl MessageSender {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Staff => "staff",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "client" => Some(Self::Client),
            "staff" => Some(Self::Staff),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PortalMessage {
    pub id: Uuid,
    pub case_id: Uuid,
    pub sender: MessageSender,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Messages of a case after a read, with how many staff messages it marked read.
#[derive(Clone, Debug)]
pub struct MessageListing {
    pub messages: Vec<PortalMessage>,
    pub newly_read: u64,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ClientTask {
    pub id: Uuid,
    pub case_id: Uuid,
    pub title: String,
    pub status: String,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct DocumentRequest {
    pub id: Uuid,
    pub case_id: Uuid,
    pub title: String,
    pub status: String,
    pub client_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Retention windows applied by the expiry sweep.
#[derive(Clone, Copy, Debug)]
pub struct SweepPolicy {
    pub session_retention: Duration,
    pub oauth_state_ttl: Duration,
    pub attempt_window: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pending_sessions: u64,
    pub expired_sessions: u64,
    pub oauth_states: u64,
    pub verify_attempts: u64,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending_sessions + self.expired_sessions + self.oauth_states + self.verify_attempts
    }
}

/// Session, OAuth-state and provider-token records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current time according to the store.
    async fn now(&self) -> StoreResult<DateTime<Utc>>;

    async fn ping(&self) -> StoreResult<()>;

    /// Delete every token-less session of the case and insert a fresh pending one,
    /// as a single unit serialized per case.
    async fn replace_pending_session(
        &self,
        case: &CaseRecord,
        code: &str,
        code_ttl: Duration,
    ) -> StoreResult<PortalSession>;

    /// Atomically match a pending, unexpired session for any case with `reference`
    /// whose code equals `code`, clear the code and attach the token hash.
    ///
    /// The newest qualifying row wins. Returns `None` when nothing matched; at most
    /// one concurrent caller can receive `Some` for a given code.
    async fn consume_code(
        &self,
        reference: &str,
        code: &str,
        token_hash: &[u8],
        token_ttl: Duration,
    ) -> StoreResult<Option<VerifiedSession>>;

    /// Find an authenticated session whose token expiry is strictly in the future.
    async fn find_active_session(&self, token_hash: &[u8]) -> StoreResult<Option<ActiveSession>>;

    /// Record an attempt for the reference and count the attempts recorded within
    /// `window`. Callers for the same reference are serialized, so two concurrent
    /// attempts never observe the same count.
    async fn reserve_verify_attempt(
        &self,
        reference: &str,
        window: Duration,
    ) -> StoreResult<VerifyAttempt>;

    /// Forget an attempt that ended in a successful verification.
    async fn release_verify_attempt(&self, attempt_id: i64) -> StoreResult<()>;

    async fn insert_oauth_state(&self, state: &NewOAuthState) -> StoreResult<()>;

    /// Atomically read and delete a state created less than `ttl` ago.
    async fn take_oauth_state(
        &self,
        state: &str,
        ttl: Duration,
    ) -> StoreResult<Option<OAuthStateRecord>>;

    async fn upsert_staff_tokens(&self, tokens: &NewStaffTokens) -> StoreResult<StaffOAuthTokens>;

    async fn get_staff_tokens(&self, staff_member_id: Uuid)
    -> StoreResult<Option<StaffOAuthTokens>>;

    async fn sweep_expired(&self, policy: &SweepPolicy) -> StoreResult<SweepReport>;
}

/// Case, staff and portal-facing records owned by the wider case system.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Cases whose reference equals `reference` (case-insensitive) and whose
    /// client name contains `last_name` (case-insensitive).
    async fn find_cases(&self, reference: &str, last_name: &str) -> StoreResult<Vec<CaseRecord>>;

    async fn get_staff_member(&self, id: Uuid) -> StoreResult<Option<StaffMember>>;

    /// Mark staff-to-client messages of the case read, then list every message.
    async fn list_messages_marking_read(&self, case_id: Uuid) -> StoreResult<MessageListing>;

    async fn insert_client_message(&self, case_id: Uuid, body: &str) -> StoreResult<PortalMessage>;

    async fn list_client_tasks(&self, case_id: Uuid) -> StoreResult<Vec<ClientTask>>;

    async fn list_document_requests(&self, case_id: Uuid) -> StoreResult<Vec<DocumentRequest>>;

    async fn get_document_request(&self, id: Uuid) -> StoreResult<Option<DocumentRequest>>;

    /// Mark a request of the given case as submitted. `None` if it does not match.
    async fn submit_document_request(
        &self,
        id: Uuid,
        case_id: Uuid,
        note: Option<&str>,
    ) -> StoreResult<Option<DocumentRequest>>;
}

pub trait Store: CredentialStore + RecordStore {}

impl<T: CredentialStore + RecordStore> Store for T {}

/// Case-insensitive key used for reference comparisons and attempt counting.
#[must_use]
pub fn normalize_reference(reference: &str) -> String {
    reference.trim().to_lowercase()
}

pub(crate) fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
