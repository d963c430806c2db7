//! `PostgreSQL` store.
//!
//! Every single-use transition is a conditional `UPDATE`/`DELETE ... RETURNING`,
//! so concurrent callers race on the row instead of on a read followed by a write.
//! Times come from the database clock (`NOW()`).

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::time::Duration;
use tracing::{Instrument, Span, info_span};
use uuid::Uuid;

use super::{
    ActiveSession, CaseRecord, ClientTask, CredentialStore, DocumentRequest, MessageListing,
    MessageSender, NewOAuthState, NewStaffTokens, OAuthStateRecord, PortalMessage, PortalSession,
    RecordStore, StaffMember, StaffOAuthTokens, StoreResult, SweepPolicy, SweepReport,
    VerifiedSession, VerifyAttempt, normalize_reference, seconds,
};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

const SESSION_COLUMNS: &str = "id, case_id, client_name, code, code_expires_at, token_hash, token_expires_at, created_at";

fn session_from_row(row: &PgRow) -> Result<PortalSession, sqlx::Error> {
    Ok(PortalSession {
        id: row.try_get("id")?,
        case_id: row.try_get("case_id")?,
        client_name: row.try_get("client_name")?,
        code: row.try_get("code")?,
        code_expires_at: row.try_get("code_expires_at")?,
        token_hash: row.try_get("token_hash")?,
        token_expires_at: row.try_get("token_expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn case_from_row(row: &PgRow) -> Result<CaseRecord, sqlx::Error> {
    Ok(CaseRecord {
        id: row.try_get("id")?,
        reference: row.try_get("reference")?,
        client_name: row.try_get("client_name")?,
        client_email: row.try_get("client_email")?,
        client_phone: row.try_get("client_phone")?,
    })
}

fn tokens_from_row(row: &PgRow) -> Result<StaffOAuthTokens, sqlx::Error> {
    let access_token: String = row.try_get("access_token")?;
    let refresh_token: Option<String> = row.try_get("refresh_token")?;
    Ok(StaffOAuthTokens {
        staff_member_id: row.try_get("staff_member_id")?,
        external_user_id: row.try_get("external_user_id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        access_token: SecretString::from(access_token),
        refresh_token: refresh_token.map(SecretString::from),
        scope: row.try_get("scope")?,
        expires_at: row.try_get("expires_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> anyhow::Result<PortalMessage> {
    let sender: String = row.try_get("sender")?;
    Ok(PortalMessage {
        id: row.try_get("id")?,
        case_id: row.try_get("case_id")?,
        sender: MessageSender::parse(&sender)
            .ok_or_else(|| anyhow!("unknown message sender: {sender}"))?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
        read_at: row.try_get("read_at")?,
    })
}

fn document_request_from_row(row: &PgRow) -> Result<DocumentRequest, sqlx::Error> {
    Ok(DocumentRequest {
        id: row.try_get("id")?,
        case_id: row.try_get("case_id")?,
        title: row.try_get("title")?,
        status: row.try_get("status")?,
        client_note: row.try_get("client_note")?,
        created_at: row.try_get("created_at")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn now(&self) -> StoreResult<DateTime<Utc>> {
        let query = "SELECT NOW() AS now";
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read database clock")?;
        Ok(row.try_get("now")?)
    }

    async fn ping(&self) -> StoreResult<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to ping database")?;
        Ok(())
    }

    async fn replace_pending_session(
        &self,
        case: &CaseRecord,
        code: &str,
        code_ttl: Duration,
    ) -> StoreResult<PortalSession> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin pending session transaction")?;

        // Lock the case row so concurrent requests for one case serialize here.
        let query = "SELECT id FROM cases WHERE id = $1 FOR UPDATE";
        sqlx::query(query)
            .bind(case.id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lock case row")?
            .ok_or_else(|| anyhow!("case disappeared while issuing a code"))?;

        let query = "DELETE FROM portal_sessions WHERE case_id = $1 AND token_hash IS NULL";
        sqlx::query(query)
            .bind(case.id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to invalidate pending sessions")?;

        let query = format!(
            r"
            INSERT INTO portal_sessions (case_id, client_name, code, code_expires_at)
            VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
            RETURNING {SESSION_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(case.id)
            .bind(&case.client_name)
            .bind(code)
            .bind(seconds(code_ttl))
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert pending session")?;
        let session = session_from_row(&row)?;

        tx.commit()
            .await
            .context("commit pending session transaction")?;
        Ok(session)
    }

    async fn consume_code(
        &self,
        reference: &str,
        code: &str,
        token_hash: &[u8],
        token_ttl: Duration,
    ) -> StoreResult<Option<VerifiedSession>> {
        // The outer predicates are re-checked against the locked row, so a row
        // consumed by a concurrent caller no longer qualifies.
        let query = r"
            UPDATE portal_sessions
            SET code = NULL,
                code_expires_at = NULL,
                token_hash = $3,
                token_expires_at = NOW() + ($4 * INTERVAL '1 second')
            WHERE id = (
                SELECT ps.id
                FROM portal_sessions ps
                JOIN cases c ON c.id = ps.case_id
                WHERE lower(c.reference) = $1
                  AND ps.token_hash IS NULL
                  AND ps.code = $2
                  AND ps.code_expires_at > NOW()
                ORDER BY ps.created_at DESC
                LIMIT 1
                FOR UPDATE OF ps SKIP LOCKED
            )
              AND token_hash IS NULL
              AND code = $2
              AND code_expires_at > NOW()
            RETURNING id, case_id, token_expires_at
        ";
        let row = sqlx::query(query)
            .bind(normalize_reference(reference))
            .bind(code)
            .bind(token_hash)
            .bind(seconds(token_ttl))
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to consume portal code")?;

        row.map(|row| -> StoreResult<VerifiedSession> {
            Ok(VerifiedSession {
                session_id: row.try_get("id")?,
                case_id: row.try_get("case_id")?,
                token_expires_at: row.try_get("token_expires_at")?,
            })
        })
        .transpose()
    }

    async fn find_active_session(&self, token_hash: &[u8]) -> StoreResult<Option<ActiveSession>> {
        let query = r"
            SELECT id, case_id, token_expires_at
            FROM portal_sessions
            WHERE token_hash = $1
              AND token_expires_at > NOW()
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup portal session")?;

        row.map(|row| -> StoreResult<ActiveSession> {
            Ok(ActiveSession {
                session_id: row.try_get("id")?,
                case_id: row.try_get("case_id")?,
                token_expires_at: row.try_get("token_expires_at")?,
            })
        })
        .transpose()
    }

    async fn reserve_verify_attempt(
        &self,
        reference: &str,
        window: Duration,
    ) -> StoreResult<VerifyAttempt> {
        let key = normalize_reference(reference);
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin verification attempt transaction")?;

        // Held until commit; serializes insert-then-count per reference.
        let query = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";
        sqlx::query(query)
            .bind(format!("portal_verify:{key}"))
            .execute(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lock verification attempts")?;

        let query = "INSERT INTO portal_verify_attempts (reference_key) VALUES ($1) RETURNING id";
        let row = sqlx::query(query)
            .bind(&key)
            .fetch_one(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to record verification attempt")?;
        let id: i64 = row.try_get("id")?;

        let query = r"
            SELECT COUNT(*) AS attempts
            FROM portal_verify_attempts
            WHERE reference_key = $1
              AND created_at > NOW() - ($2 * INTERVAL '1 second')
        ";
        let row = sqlx::query(query)
            .bind(&key)
            .bind(seconds(window))
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count verification attempts")?;
        let attempts_in_window: i64 = row.try_get("attempts")?;

        tx.commit()
            .await
            .context("commit verification attempt transaction")?;
        Ok(VerifyAttempt {
            id,
            attempts_in_window,
        })
    }

    async fn release_verify_attempt(&self, attempt_id: i64) -> StoreResult<()> {
        let query = "DELETE FROM portal_verify_attempts WHERE id = $1";
        sqlx::query(query)
            .bind(attempt_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to release verification attempt")?;
        Ok(())
    }

    async fn insert_oauth_state(&self, state: &NewOAuthState) -> StoreResult<()> {
        let query = r"
            INSERT INTO oauth_states (state, staff_member_id, code_verifier, redirect_after)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&state.state)
            .bind(state.staff_member_id)
            .bind(state.code_verifier.expose_secret())
            .bind(&state.redirect_after)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert oauth state")?;
        Ok(())
    }

    async fn take_oauth_state(
        &self,
        state: &str,
        ttl: Duration,
    ) -> StoreResult<Option<OAuthStateRecord>> {
        // Stale rows are deleted too; only fresh ones are handed back.
        let query = r"
            DELETE FROM oauth_states
            WHERE state = $1
            RETURNING state, staff_member_id, code_verifier, redirect_after, created_at,
                      created_at > NOW() - ($2 * INTERVAL '1 second') AS fresh
        ";
        let row = sqlx::query(query)
            .bind(state)
            .bind(seconds(ttl))
            .fetch_optional(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to consume oauth state")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let fresh: bool = row.try_get("fresh")?;
        if !fresh {
            return Ok(None);
        }
        let verifier: String = row.try_get("code_verifier")?;
        Ok(Some(OAuthStateRecord {
            state: row.try_get("state")?,
            staff_member_id: row.try_get("staff_member_id")?,
            code_verifier: SecretString::from(verifier),
            redirect_after: row.try_get("redirect_after")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn upsert_staff_tokens(&self, tokens: &NewStaffTokens) -> StoreResult<StaffOAuthTokens> {
        let query = r"
            INSERT INTO staff_oauth_tokens
                (staff_member_id, external_user_id, email, display_name,
                 access_token, refresh_token, scope, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW() + ($8 * INTERVAL '1 second'), NOW())
            ON CONFLICT (staff_member_id) DO UPDATE SET
                external_user_id = EXCLUDED.external_user_id,
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, staff_oauth_tokens.refresh_token),
                scope = EXCLUDED.scope,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            RETURNING staff_member_id, external_user_id, email, display_name,
                      access_token, refresh_token, scope, expires_at, updated_at
        ";
        let row = sqlx::query(query)
            .bind(tokens.staff_member_id)
            .bind(&tokens.external_user_id)
            .bind(&tokens.email)
            .bind(&tokens.display_name)
            .bind(tokens.access_token.expose_secret())
            .bind(tokens.refresh_token.as_ref().map(ExposeSecret::expose_secret))
            .bind(&tokens.scope)
            .bind(tokens.expires_in_seconds.max(0))
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert staff oauth tokens")?;
        Ok(tokens_from_row(&row)?)
    }

    async fn get_staff_tokens(
        &self,
        staff_member_id: Uuid,
    ) -> StoreResult<Option<StaffOAuthTokens>> {
        let query = r"
            SELECT staff_member_id, external_user_id, email, display_name,
                   access_token, refresh_token, scope, expires_at, updated_at
            FROM staff_oauth_tokens
            WHERE staff_member_id = $1
        ";
        let row = sqlx::query(query)
            .bind(staff_member_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup staff oauth tokens")?;
        Ok(row.as_ref().map(tokens_from_row).transpose()?)
    }

    async fn sweep_expired(&self, policy: &SweepPolicy) -> StoreResult<SweepReport> {
        let mut report = SweepReport::default();

        let query = r"
            DELETE FROM portal_sessions
            WHERE token_hash IS NULL
              AND (code_expires_at IS NULL OR code_expires_at <= NOW())
        ";
        report.pending_sessions = sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to sweep pending sessions")?
            .rows_affected();

        let query = r"
            DELETE FROM portal_sessions
            WHERE token_expires_at <= NOW() - ($1 * INTERVAL '1 second')
        ";
        report.expired_sessions = sqlx::query(query)
            .bind(seconds(policy.session_retention))
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to sweep expired sessions")?
            .rows_affected();

        let query = "DELETE FROM oauth_states WHERE created_at <= NOW() - ($1 * INTERVAL '1 second')";
        report.oauth_states = sqlx::query(query)
            .bind(seconds(policy.oauth_state_ttl))
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to sweep oauth states")?
            .rows_affected();

        let query =
            "DELETE FROM portal_verify_attempts WHERE created_at <= NOW() - ($1 * INTERVAL '1 second')";
        report.verify_attempts = sqlx::query(query)
            .bind(seconds(policy.attempt_window))
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to sweep verification attempts")?
            .rows_affected();

        Ok(report)
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_cases(&self, reference: &str, last_name: &str) -> StoreResult<Vec<CaseRecord>> {
        // strpos avoids treating `%`/`_` in user input as LIKE wildcards.
        let query = r"
            SELECT id, reference, client_name, client_email, client_phone
            FROM cases
            WHERE lower(reference) = $1
              AND strpos(lower(client_name), $2) > 0
        ";
        let rows = sqlx::query(query)
            .bind(normalize_reference(reference))
            .bind(last_name.trim().to_lowercase())
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup cases")?;
        Ok(rows.iter().map(case_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_staff_member(&self, id: Uuid) -> StoreResult<Option<StaffMember>> {
        let query = "SELECT id, name, email, role FROM staff_members WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup staff member")?;

        row.map(|row| -> StoreResult<StaffMember> {
            Ok(StaffMember {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                role: row.try_get("role")?,
            })
        })
        .transpose()
    }

    async fn list_messages_marking_read(&self, case_id: Uuid) -> StoreResult<MessageListing> {
        let mut tx = self.pool.begin().await.context("begin messages transaction")?;

        let query = r"
            UPDATE portal_messages
            SET read_at = NOW()
            WHERE case_id = $1
              AND sender = 'staff'
              AND read_at IS NULL
        ";
        let marked = sqlx::query(query)
            .bind(case_id)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to mark messages read")?;

        let query = r"
            SELECT id, case_id, sender, body, created_at, read_at
            FROM portal_messages
            WHERE case_id = $1
            ORDER BY created_at
        ";
        let rows = sqlx::query(query)
            .bind(case_id)
            .fetch_all(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list messages")?;

        tx.commit().await.context("commit messages transaction")?;
        Ok(MessageListing {
            messages: rows
                .iter()
                .map(message_from_row)
                .collect::<anyhow::Result<_>>()?,
            newly_read: marked.rows_affected(),
        })
    }

    async fn insert_client_message(&self, case_id: Uuid, body: &str) -> StoreResult<PortalMessage> {
        let query = r"
            INSERT INTO portal_messages (case_id, sender, body)
            VALUES ($1, 'client', $2)
            RETURNING id, case_id, sender, body, created_at, read_at
        ";
        let row = sqlx::query(query)
            .bind(case_id)
            .bind(body)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert client message")?;
        message_from_row(&row)
    }

    async fn list_client_tasks(&self, case_id: Uuid) -> StoreResult<Vec<ClientTask>> {
        let query = r"
            SELECT id, case_id, title, status, due_at
            FROM client_tasks
            WHERE case_id = $1
              AND client_visible
            ORDER BY due_at NULLS LAST, title
        ";
        let rows = sqlx::query(query)
            .bind(case_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list client tasks")?;

        rows.iter()
            .map(|row| -> StoreResult<ClientTask> {
                Ok(ClientTask {
                    id: row.try_get("id")?,
                    case_id: row.try_get("case_id")?,
                    title: row.try_get("title")?,
                    status: row.try_get("status")?,
                    due_at: row.try_get("due_at")?,
                })
            })
            .collect()
    }

    async fn list_document_requests(&self, case_id: Uuid) -> StoreResult<Vec<DocumentRequest>> {
        let query = r"
            SELECT id, case_id, title, status, client_note, created_at, submitted_at
            FROM document_requests
            WHERE case_id = $1
            ORDER BY created_at
        ";
        let rows = sqlx::query(query)
            .bind(case_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list document requests")?;
        Ok(rows
            .iter()
            .map(document_request_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn get_document_request(&self, id: Uuid) -> StoreResult<Option<DocumentRequest>> {
        let query = r"
            SELECT id, case_id, title, status, client_note, created_at, submitted_at
            FROM document_requests
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup document request")?;
        Ok(row.as_ref().map(document_request_from_row).transpose()?)
    }

    async fn submit_document_request(
        &self,
        id: Uuid,
        case_id: Uuid,
        note: Option<&str>,
    ) -> StoreResult<Option<DocumentRequest>> {
        let query = r"
            UPDATE document_requests
            SET status = 'submitted',
                client_note = $3,
                submitted_at = NOW()
            WHERE id = $1
              AND case_id = $2
            RETURNING id, case_id, title, status, client_note, created_at, submitted_at
        ";
        let row = sqlx::query(query)
            .bind(id)
            .bind(case_id)
            .bind(note)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to submit document request")?;
        Ok(row.as_ref().map(document_request_from_row).transpose()?)
    }
}
