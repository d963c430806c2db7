//! In-process store with a controllable clock.
//!
//! All mutations happen under one async mutex, so each trait method is atomic
//! with respect to the others, mirroring the conditional updates of the
//! `PostgreSQL` store.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ActiveSession, CaseRecord, ClientTask, CredentialStore, DocumentRequest, MessageListing,
    MessageSender, NewOAuthState, NewStaffTokens, OAuthStateRecord, PortalMessage, PortalSession,
    RecordStore, StaffMember, StaffOAuthTokens, StoreResult, SweepPolicy, SweepReport,
    VerifiedSession, VerifyAttempt, normalize_reference,
};

#[derive(Default)]
struct Inner {
    cases: Vec<CaseRecord>,
    staff: HashMap<Uuid, StaffMember>,
    sessions: Vec<PortalSession>,
    verify_attempts: Vec<(i64, String, DateTime<Utc>)>,
    next_attempt_id: i64,
    oauth_states: HashMap<String, OAuthStateRecord>,
    staff_tokens: HashMap<Uuid, StaffOAuthTokens>,
    messages: Vec<PortalMessage>,
    tasks: Vec<(ClientTask, bool)>,
    document_requests: Vec<DocumentRequest>,
}

#[derive(Default)]
struct Clock {
    frozen: Option<DateTime<Utc>>,
    offset: TimeDelta,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Mutex<Clock>,
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::days(365 * 100))
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the clock at `at`; later calls to [`Self::advance`] move it forward.
    pub async fn freeze_at(&self, at: DateTime<Utc>) {
        let mut clock = self.clock.lock().await;
        clock.frozen = Some(at);
        clock.offset = TimeDelta::zero();
    }

    pub async fn advance(&self, by: Duration) {
        let mut clock = self.clock.lock().await;
        clock.offset += delta(by);
    }

    async fn current_time(&self) -> DateTime<Utc> {
        let clock = self.clock.lock().await;
        clock.frozen.unwrap_or_else(Utc::now) + clock.offset
    }

    pub async fn add_case(&self, reference: &str, client_name: &str) -> CaseRecord {
        let case = CaseRecord {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            client_name: client_name.to_string(),
            client_email: Some(format!(
                "{}@client.example",
                client_name.to_lowercase().replace(' ', ".")
            )),
            client_phone: None,
        };
        self.inner.lock().await.cases.push(case.clone());
        case
    }

    pub async fn add_staff_member(&self, name: &str, email: &str, role: &str) -> StaffMember {
        let member = StaffMember {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        };
        self.inner
            .lock()
            .await
            .staff
            .insert(member.id, member.clone());
        member
    }

    pub async fn add_staff_message(&self, case_id: Uuid, body: &str) -> PortalMessage {
        let now = self.current_time().await;
        let message = PortalMessage {
            id: Uuid::new_v4(),
            case_id,
            sender: MessageSender::Staff,
            body: body.to_string(),
            created_at: now,
            read_at: None,
        };
        self.inner.lock().await.messages.push(message.clone());
        message
    }

    pub async fn add_task(&self, case_id: Uuid, title: &str, client_visible: bool) -> ClientTask {
        let task = ClientTask {
            id: Uuid::new_v4(),
            case_id,
            title: title.to_string(),
            status: "open".to_string(),
            due_at: None,
        };
        self.inner
            .lock()
            .await
            .tasks
            .push((task.clone(), client_visible));
        task
    }

    pub async fn add_document_request(&self, case_id: Uuid, title: &str) -> DocumentRequest {
        let now = self.current_time().await;
        let request = DocumentRequest {
            id: Uuid::new_v4(),
            case_id,
            title: title.to_string(),
            status: "requested".to_string(),
            client_note: None,
            created_at: now,
            submitted_at: None,
        };
        self.inner
            .lock()
            .await
            .document_requests
            .push(request.clone());
        request
    }

    /// Read the code of the newest pending session, as an operator could from the table.
    pub async fn pending_code(&self, case_id: Uuid) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .iter()
            .filter(|s| s.case_id == case_id && s.token_hash.is_none())
            .max_by_key(|s| s.created_at)
            .and_then(|s| s.code.clone())
    }

    pub async fn sessions_for_case(&self, case_id: Uuid) -> Vec<PortalSession> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .iter()
            .filter(|s| s.case_id == case_id)
            .cloned()
            .collect()
    }

    pub async fn oauth_state_count(&self) -> usize {
        self.inner.lock().await.oauth_states.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn now(&self) -> StoreResult<DateTime<Utc>> {
        Ok(self.current_time().await)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn replace_pending_session(
        &self,
        case: &CaseRecord,
        code: &str,
        code_ttl: Duration,
    ) -> StoreResult<PortalSession> {
        let now = self.current_time().await;
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .retain(|s| !(s.case_id == case.id && s.token_hash.is_none()));
        let session = PortalSession {
            id: Uuid::new_v4(),
            case_id: case.id,
            client_name: case.client_name.clone(),
            code: Some(code.to_string()),
            code_expires_at: Some(now + delta(code_ttl)),
            token_hash: None,
            token_expires_at: None,
            created_at: now,
        };
        inner.sessions.push(session.clone());
        Ok(session)
    }

    async fn consume_code(
        &self,
        reference: &str,
        code: &str,
        token_hash: &[u8],
        token_ttl: Duration,
    ) -> StoreResult<Option<VerifiedSession>> {
        let now = self.current_time().await;
        let key = normalize_reference(reference);
        let mut inner = self.inner.lock().await;

        let case_ids: Vec<Uuid> = inner
            .cases
            .iter()
            .filter(|c| normalize_reference(&c.reference) == key)
            .map(|c| c.id)
            .collect();

        let candidate = inner
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                case_ids.contains(&s.case_id)
                    && s.token_hash.is_none()
                    && s.code.as_deref() == Some(code)
                    && s.code_expires_at.is_some_and(|at| at > now)
            })
            .max_by_key(|(index, s)| (s.created_at, *index))
            .map(|(index, _)| index);

        let Some(index) = candidate else {
            return Ok(None);
        };

        let token_expires_at = now + delta(token_ttl);
        let session = &mut inner.sessions[index];
        session.code = None;
        session.code_expires_at = None;
        session.token_hash = Some(token_hash.to_vec());
        session.token_expires_at = Some(token_expires_at);

        Ok(Some(VerifiedSession {
            session_id: session.id,
            case_id: session.case_id,
            token_expires_at,
        }))
    }

    async fn find_active_session(&self, token_hash: &[u8]) -> StoreResult<Option<ActiveSession>> {
        let now = self.current_time().await;
        let inner = self.inner.lock().await;
        Ok(inner.sessions.iter().find_map(|s| {
            let expires_at = s.token_expires_at?;
            (s.token_hash.as_deref() == Some(token_hash) && expires_at > now).then(|| {
                ActiveSession {
                    session_id: s.id,
                    case_id: s.case_id,
                    token_expires_at: expires_at,
                }
            })
        }))
    }

    async fn reserve_verify_attempt(
        &self,
        reference: &str,
        window: Duration,
    ) -> StoreResult<VerifyAttempt> {
        let now = self.current_time().await;
        let since = now - delta(window);
        let key = normalize_reference(reference);
        let mut inner = self.inner.lock().await;
        inner.next_attempt_id += 1;
        let id = inner.next_attempt_id;
        inner.verify_attempts.push((id, key.clone(), now));
        let count = inner
            .verify_attempts
            .iter()
            .filter(|(_, r, at)| *r == key && *at > since)
            .count();
        Ok(VerifyAttempt {
            id,
            attempts_in_window: i64::try_from(count).unwrap_or(i64::MAX),
        })
    }

    async fn release_verify_attempt(&self, attempt_id: i64) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .verify_attempts
            .retain(|(id, _, _)| *id != attempt_id);
        Ok(())
    }

    async fn insert_oauth_state(&self, state: &NewOAuthState) -> StoreResult<()> {
        let now = self.current_time().await;
        let mut inner = self.inner.lock().await;
        if inner.oauth_states.contains_key(&state.state) {
            anyhow::bail!("duplicate oauth state");
        }
        inner.oauth_states.insert(
            state.state.clone(),
            OAuthStateRecord {
                state: state.state.clone(),
                staff_member_id: state.staff_member_id,
                code_verifier: state.code_verifier.clone(),
                redirect_after: state.redirect_after.clone(),
                created_at: now,
            },
        );
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        state: &str,
        ttl: Duration,
    ) -> StoreResult<Option<OAuthStateRecord>> {
        let now = self.current_time().await;
        let mut inner = self.inner.lock().await;
        Ok(inner
            .oauth_states
            .remove(state)
            .filter(|record| record.created_at + delta(ttl) > now))
    }

    async fn upsert_staff_tokens(&self, tokens: &NewStaffTokens) -> StoreResult<StaffOAuthTokens> {
        let now = self.current_time().await;
        let mut inner = self.inner.lock().await;
        let previous_refresh = inner
            .staff_tokens
            .get(&tokens.staff_member_id)
            .and_then(|existing| existing.refresh_token.clone());
        let record = StaffOAuthTokens {
            staff_member_id: tokens.staff_member_id,
            external_user_id: tokens.external_user_id.clone(),
            email: tokens.email.clone(),
            display_name: tokens.display_name.clone(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone().or(previous_refresh),
            scope: tokens.scope.clone(),
            expires_at: now + TimeDelta::seconds(tokens.expires_in_seconds.max(0)),
            updated_at: now,
        };
        inner
            .staff_tokens
            .insert(tokens.staff_member_id, record.clone());
        Ok(record)
    }

    async fn get_staff_tokens(
        &self,
        staff_member_id: Uuid,
    ) -> StoreResult<Option<StaffOAuthTokens>> {
        Ok(self
            .inner
            .lock()
            .await
            .staff_tokens
            .get(&staff_member_id)
            .cloned())
    }

    async fn sweep_expired(&self, policy: &SweepPolicy) -> StoreResult<SweepReport> {
        let now = self.current_time().await;
        let mut inner = self.inner.lock().await;
        let mut report = SweepReport::default();

        let before = inner.sessions.len();
        inner.sessions.retain(|s| {
            !(s.token_hash.is_none() && s.code_expires_at.is_none_or(|at| at <= now))
        });
        report.pending_sessions = (before - inner.sessions.len()) as u64;

        let cutoff = now - delta(policy.session_retention);
        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|s| s.token_expires_at.is_none_or(|at| at > cutoff));
        report.expired_sessions = (before - inner.sessions.len()) as u64;

        let state_cutoff = now - delta(policy.oauth_state_ttl);
        let before = inner.oauth_states.len();
        inner
            .oauth_states
            .retain(|_, record| record.created_at > state_cutoff);
        report.oauth_states = (before - inner.oauth_states.len()) as u64;

        let attempt_cutoff = now - delta(policy.attempt_window);
        let before = inner.verify_attempts.len();
        inner.verify_attempts.retain(|(_, _, at)| *at > attempt_cutoff);
        report.verify_attempts = (before - inner.verify_attempts.len()) as u64;

        Ok(report)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_cases(&self, reference: &str, last_name: &str) -> StoreResult<Vec<CaseRecord>> {
        let key = normalize_reference(reference);
        let needle = last_name.trim().to_lowercase();
        let inner = self.inner.lock().await;
        Ok(inner
            .cases
            .iter()
            .filter(|c| {
                normalize_reference(&c.reference) == key
                    && c.client_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn get_staff_member(&self, id: Uuid) -> StoreResult<Option<StaffMember>> {
        Ok(self.inner.lock().await.staff.get(&id).cloned())
    }

    async fn list_messages_marking_read(&self, case_id: Uuid) -> StoreResult<MessageListing> {
        let now = self.current_time().await;
        let mut inner = self.inner.lock().await;
        let mut newly_read = 0;
        for message in inner.messages.iter_mut().filter(|m| {
            m.case_id == case_id && m.sender == MessageSender::Staff && m.read_at.is_none()
        }) {
            message.read_at = Some(now);
            newly_read += 1;
        }
        let mut messages: Vec<PortalMessage> = inner
            .messages
            .iter()
            .filter(|m| m.case_id == case_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(MessageListing {
            messages,
            newly_read,
        })
    }

    async fn insert_client_message(&self, case_id: Uuid, body: &str) -> StoreResult<PortalMessage> {
        let now = self.current_time().await;
        let message = PortalMessage {
            id: Uuid::new_v4(),
            case_id,
            sender: MessageSender::Client,
            body: body.to_string(),
            created_at: now,
            read_at: None,
        };
        self.inner.lock().await.messages.push(message.clone());
        Ok(message)
    }

    async fn list_client_tasks(&self, case_id: Uuid) -> StoreResult<Vec<ClientTask>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .iter()
            .filter(|(task, visible)| *visible && task.case_id == case_id)
            .map(|(task, _)| task.clone())
            .collect())
    }

    async fn list_document_requests(&self, case_id: Uuid) -> StoreResult<Vec<DocumentRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .document_requests
            .iter()
            .filter(|r| r.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn get_document_request(&self, id: Uuid) -> StoreResult<Option<DocumentRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner.document_requests.iter().find(|r| r.id == id).cloned())
    }

    async fn submit_document_request(
        &self,
        id: Uuid,
        case_id: Uuid,
        note: Option<&str>,
    ) -> StoreResult<Option<DocumentRequest>> {
        let now = self.current_time().await;
        let mut inner = self.inner.lock().await;
        Ok(inner
            .document_requests
            .iter_mut()
            .find(|r| r.id == id && r.case_id == case_id)
            .map(|request| {
                request.status = "submitted".to_string();
                request.client_note = note.map(str::to_string);
                request.submitted_at = Some(now);
                request.clone()
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use secrecy::SecretString;

    #[tokio::test]
    async fn replace_pending_session_keeps_one_pending_row() -> Result<()> {
        let store = MemoryStore::new();
        let case = store.add_case("DL-0042", "Jane Smith").await;
        store
            .replace_pending_session(&case, "111111", Duration::from_secs(600))
            .await?;
        store
            .replace_pending_session(&case, "222222", Duration::from_secs(600))
            .await?;

        let sessions = store.sessions_for_case(case.id).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(store.pending_code(case.id).await.as_deref(), Some("222222"));
        Ok(())
    }

    #[tokio::test]
    async fn consume_code_is_single_use() -> Result<()> {
        let store = MemoryStore::new();
        let case = store.add_case("DL-0042", "Jane Smith").await;
        store
            .replace_pending_session(&case, "123456", Duration::from_secs(600))
            .await?;

        let first = store
            .consume_code("dl-0042", "123456", b"hash", Duration::from_secs(60))
            .await?
            .context("first consume should match")?;
        assert_eq!(first.case_id, case.id);

        let second = store
            .consume_code("dl-0042", "123456", b"hash2", Duration::from_secs(60))
            .await?;
        assert!(second.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn consume_code_rejects_expired_code() -> Result<()> {
        let store = MemoryStore::new();
        let case = store.add_case("DL-0042", "Jane Smith").await;
        store.freeze_at(Utc::now()).await;
        store
            .replace_pending_session(&case, "123456", Duration::from_secs(600))
            .await?;
        store.advance(Duration::from_secs(600)).await;

        let result = store
            .consume_code("DL-0042", "123456", b"hash", Duration::from_secs(60))
            .await?;
        assert!(result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn take_oauth_state_deletes_and_honours_ttl() -> Result<()> {
        let store = MemoryStore::new();
        store.freeze_at(Utc::now()).await;
        let member = Uuid::new_v4();
        for state in ["fresh", "stale"] {
            store
                .insert_oauth_state(&NewOAuthState {
                    state: state.to_string(),
                    staff_member_id: member,
                    code_verifier: SecretString::from("verifier".to_string()),
                    redirect_after: "/".to_string(),
                })
                .await?;
        }
        store.advance(Duration::from_secs(30)).await;

        let ttl = Duration::from_secs(60);
        assert!(store.take_oauth_state("fresh", ttl).await?.is_some());
        assert!(store.take_oauth_state("fresh", ttl).await?.is_none());

        store.advance(Duration::from_secs(60)).await;
        assert!(store.take_oauth_state("stale", ttl).await?.is_none());
        assert_eq!(store.oauth_state_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_removes_expired_rows_only() -> Result<()> {
        let store = MemoryStore::new();
        store.freeze_at(Utc::now()).await;
        let stale = store.add_case("DL-1", "Ann Lee").await;
        let live = store.add_case("DL-2", "Bob Ray").await;

        store
            .replace_pending_session(&stale, "111111", Duration::from_secs(60))
            .await?;
        store.advance(Duration::from_secs(120)).await;
        store
            .replace_pending_session(&live, "222222", Duration::from_secs(600))
            .await?;
        store
            .reserve_verify_attempt("DL-1", Duration::from_secs(900))
            .await?;

        let report = store
            .sweep_expired(&SweepPolicy {
                session_retention: Duration::from_secs(3600),
                oauth_state_ttl: Duration::from_secs(600),
                attempt_window: Duration::from_secs(900),
            })
            .await?;

        assert_eq!(report.pending_sessions, 1);
        assert_eq!(report.verify_attempts, 0);
        assert!(store.sessions_for_case(stale.id).await.is_empty());
        assert_eq!(store.sessions_for_case(live.id).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn list_messages_marks_staff_messages_read() -> Result<()> {
        let store = MemoryStore::new();
        let case = store.add_case("DL-0042", "Jane Smith").await;
        store.add_staff_message(case.id, "Please sign").await;
        store.insert_client_message(case.id, "Done").await?;

        let listing = store.list_messages_marking_read(case.id).await?;
        assert_eq!(listing.newly_read, 1);
        let messages = listing.messages;
        assert_eq!(messages.len(), 2);
        assert!(
            messages
                .iter()
                .filter(|m| m.sender == MessageSender::Staff)
                .all(|m| m.read_at.is_some())
        );
        assert!(
            messages
                .iter()
                .filter(|m| m.sender == MessageSender::Client)
                .all(|m| m.read_at.is_none())
        );
        Ok(())
    }
}
