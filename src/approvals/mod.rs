//! Human-in-the-loop approval gate.
//!
//! Side-effecting tools configured with `requires_approval` suspend the turn
//! until a human resolves a pending approval. The gate persists approvals
//! through an [`ApprovalStore`], broadcasts resolutions so waiting runners
//! wake promptly, and falls back to a bounded poll so a resolve becomes
//! visible within one poll interval even without the notification.
//!
//! State machine: `pending → approved | denied | expired`. Expiry is lazy
//! (applied on read) and swept periodically; an expired approval is never
//! re-opened.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::signal::AbortSignal;
use crate::error::{ErrorCode, NexusError, NexusResult};
use crate::tools::traits::RiskLevel;

// ─── Approval model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }
}

/// A resolution decision from outside the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
}

impl Decision {
    fn status(self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Denied => ApprovalStatus::Denied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: String,
    pub project_id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_id: String,
    pub tool_input: Value,
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Everything needed to open an approval.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub project_id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_id: String,
    pub tool_input: Value,
    pub risk_level: RiskLevel,
    pub expires_at: DateTime<Utc>,
}

// ─── ApprovalStore ────────────────────────────────────────────────────────────

/// Result of an atomic resolve attempt.
#[derive(Debug, Clone)]
pub enum ResolveAttempt {
    /// The decision took effect.
    Resolved(Approval),
    /// The approval was already terminal; carries the current state.
    AlreadyTerminal(Approval),
}

/// Persistence for approvals. Writes are row-isolated: `try_resolve` and
/// expiry are atomic per approval.
pub trait ApprovalStore: Send + Sync {
    fn insert(&self, approval: &Approval) -> NexusResult<()>;

    /// Fetch with lazy expiry: a pending approval past `now` is flipped to
    /// expired before being returned.
    fn get(&self, id: &str, now: DateTime<Utc>) -> NexusResult<Option<Approval>>;

    /// Pending approvals for a project, excluding any past `now`.
    fn list_pending(&self, project_id: &str, now: DateTime<Utc>) -> NexusResult<Vec<Approval>>;

    /// Apply a decision if the approval is still pending.
    fn try_resolve(
        &self,
        id: &str,
        decision: Decision,
        resolved_by: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> NexusResult<Option<ResolveAttempt>>;

    /// Flip every overdue pending approval to expired. Returns the count.
    fn expire_overdue(&self, now: DateTime<Utc>) -> NexusResult<usize>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// `RwLock<HashMap>`-backed store used by unit tests and single-process
/// deployments; the database-backed store is the production path.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    rows: RwLock<HashMap<String, Approval>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> NexusError {
        NexusError::internal("approval store lock poisoned")
    }
}

fn lazily_expire(approval: &mut Approval, now: DateTime<Utc>) {
    if approval.status == ApprovalStatus::Pending && approval.expires_at <= now {
        approval.status = ApprovalStatus::Expired;
    }
}

impl ApprovalStore for InMemoryApprovalStore {
    fn insert(&self, approval: &Approval) -> NexusResult<()> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        rows.insert(approval.id.clone(), approval.clone());
        Ok(())
    }

    fn get(&self, id: &str, now: DateTime<Utc>) -> NexusResult<Option<Approval>> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        Ok(rows.get_mut(id).map(|a| {
            lazily_expire(a, now);
            a.clone()
        }))
    }

    fn list_pending(&self, project_id: &str, now: DateTime<Utc>) -> NexusResult<Vec<Approval>> {
        let rows = self.rows.read().map_err(|_| Self::lock_err())?;
        let mut pending: Vec<Approval> = rows
            .values()
            .filter(|a| {
                a.project_id == project_id
                    && a.status == ApprovalStatus::Pending
                    && a.expires_at > now
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(pending)
    }

    fn try_resolve(
        &self,
        id: &str,
        decision: Decision,
        resolved_by: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> NexusResult<Option<ResolveAttempt>> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        let Some(approval) = rows.get_mut(id) else {
            return Ok(None);
        };
        lazily_expire(approval, now);
        if approval.status.is_terminal() {
            return Ok(Some(ResolveAttempt::AlreadyTerminal(approval.clone())));
        }
        approval.status = decision.status();
        approval.resolved_by = Some(resolved_by.to_owned());
        approval.resolved_at = Some(now);
        approval.note = note.map(str::to_owned);
        Ok(Some(ResolveAttempt::Resolved(approval.clone())))
    }

    fn expire_overdue(&self, now: DateTime<Utc>) -> NexusResult<usize> {
        let mut rows = self.rows.write().map_err(|_| Self::lock_err())?;
        let mut expired = 0;
        for approval in rows.values_mut() {
            if approval.status == ApprovalStatus::Pending && approval.expires_at <= now {
                approval.status = ApprovalStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

// ─── ApprovalGate ─────────────────────────────────────────────────────────────

const NOTIFY_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct ResolutionNotice {
    approval_id: String,
}

pub struct ApprovalGate {
    store: Arc<dyn ApprovalStore>,
    notify_tx: broadcast::Sender<ResolutionNotice>,
    poll_interval: Duration,
    /// Pending lifetime applied when opening approvals.
    ttl: chrono::Duration,
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn ApprovalStore>, poll_interval: Duration, ttl_secs: i64) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            store,
            notify_tx,
            poll_interval,
            ttl: chrono::Duration::seconds(ttl_secs),
        }
    }

    /// Open a pending approval for a tool call.
    pub fn request_approval(&self, request: ApprovalRequest) -> NexusResult<Approval> {
        let approval = Approval {
            id: Uuid::new_v4().to_string(),
            project_id: request.project_id,
            session_id: request.session_id,
            tool_call_id: request.tool_call_id,
            tool_id: request.tool_id,
            tool_input: request.tool_input,
            risk_level: request.risk_level,
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            expires_at: request.expires_at,
            resolved_by: None,
            resolved_at: None,
            note: None,
        };
        self.store.insert(&approval)?;
        info!(
            approval_id = %approval.id,
            tool_id = %approval.tool_id,
            "approval requested"
        );
        Ok(approval)
    }

    /// Default expiry for a newly opened approval.
    pub fn default_expiry(&self) -> DateTime<Utc> {
        Utc::now() + self.ttl
    }

    /// Block until the approval reaches a terminal state.
    ///
    /// Wakes on the resolution broadcast and re-reads the store at the poll
    /// cadence regardless, so a resolve is observed within one interval even
    /// if the notice is missed. Returns `Cancelled` if `abort` fires first.
    pub async fn await_resolution(
        &self,
        approval_id: &str,
        abort: &AbortSignal,
    ) -> NexusResult<ApprovalStatus> {
        let mut rx = self.notify_tx.subscribe();
        loop {
            let approval = self
                .store
                .get(approval_id, Utc::now())?
                .ok_or_else(|| NexusError::not_found(format!("approval {approval_id}")))?;
            if approval.status.is_terminal() {
                return Ok(approval.status);
            }

            tokio::select! {
                _ = abort.aborted() => return Err(NexusError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
                notice = rx.recv() => {
                    match notice {
                        Ok(n) if n.approval_id == approval_id => {}
                        // Someone else's approval, or a lagged receiver:
                        // fall through to the store re-read.
                        Ok(_) | Err(_) => {}
                    }
                }
            }
        }
    }

    /// Apply an external decision. Idempotent on non-pending approvals: the
    /// second resolve fails `APPROVAL_NOT_PENDING` and reports the state the
    /// first one produced.
    pub fn resolve(
        &self,
        approval_id: &str,
        decision: Decision,
        resolved_by: &str,
        note: Option<&str>,
    ) -> NexusResult<Approval> {
        if resolved_by.trim().is_empty() {
            return Err(NexusError::Validation {
                message: "resolvedBy must not be empty".to_owned(),
                issues: vec![crate::error::ValidationIssue::new(
                    "resolvedBy",
                    "must be at least 1 character",
                )],
            });
        }

        let attempt = self
            .store
            .try_resolve(approval_id, decision, resolved_by, note, Utc::now())?
            .ok_or_else(|| NexusError::not_found(format!("approval {approval_id}")))?;

        match attempt {
            ResolveAttempt::Resolved(approval) => {
                let _ = self.notify_tx.send(ResolutionNotice {
                    approval_id: approval.id.clone(),
                });
                info!(approval_id, decision = ?decision, resolved_by, "approval resolved");
                Ok(approval)
            }
            ResolveAttempt::AlreadyTerminal(approval) => Err(NexusError::Conflict {
                code: ErrorCode::ApprovalNotPending,
                message: format!(
                    "approval {approval_id} is {}, not pending",
                    approval.status.as_str()
                ),
            }),
        }
    }

    pub fn get(&self, approval_id: &str) -> NexusResult<Option<Approval>> {
        self.store.get(approval_id, Utc::now())
    }

    pub fn list_pending(&self, project_id: &str) -> NexusResult<Vec<Approval>> {
        self.store.list_pending(project_id, Utc::now())
    }

    /// One sweep pass; used by the background sweeper and by tests.
    pub fn sweep_expired(&self) -> NexusResult<usize> {
        let expired = self.store.expire_overdue(Utc::now())?;
        if expired > 0 {
            info!(expired, "expired overdue approvals");
        }
        Ok(expired)
    }

    /// Spawn the periodic sweeper. Send `true` on the returned channel's
    /// sender side to stop it.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut stop_rx: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = gate.sweep_expired() {
                            warn!("approval sweep failed: {e}");
                        }
                    }
                    Ok(()) = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate() -> Arc<ApprovalGate> {
        Arc::new(ApprovalGate::new(
            Arc::new(InMemoryApprovalStore::new()),
            Duration::from_millis(20),
            3600,
        ))
    }

    fn request(project: &str) -> ApprovalRequest {
        ApprovalRequest {
            project_id: project.to_owned(),
            session_id: "s1".to_owned(),
            tool_call_id: "c1".to_owned(),
            tool_id: "http-request".to_owned(),
            tool_input: json!({"url": "https://example.com"}),
            risk_level: RiskLevel::Medium,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn request_creates_pending_approval() {
        let gate = gate();
        let approval = gate.request_approval(request("p1")).unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);

        let pending = gate.list_pending("p1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, approval.id);
    }

    #[tokio::test]
    async fn resolve_releases_waiter() {
        let gate = gate();
        let approval = gate.request_approval(request("p1")).unwrap();

        let waiter = Arc::clone(&gate);
        let id = approval.id.clone();
        let handle = tokio::spawn(async move {
            waiter.await_resolution(&id, &AbortSignal::new()).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.resolve(&approval.id, Decision::Approved, "admin", None)
            .unwrap();

        let status = handle.await.unwrap().unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn second_resolve_conflicts_with_current_state() {
        let gate = gate();
        let approval = gate.request_approval(request("p1")).unwrap();
        gate.resolve(&approval.id, Decision::Denied, "admin", Some("nope"))
            .unwrap();

        let err = gate
            .resolve(&approval.id, Decision::Approved, "other", None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApprovalNotPending);

        // The first decision stands.
        let current = gate.get(&approval.id).unwrap().unwrap();
        assert_eq!(current.status, ApprovalStatus::Denied);
        assert_eq!(current.resolved_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn empty_resolved_by_is_rejected() {
        let gate = gate();
        let approval = gate.request_approval(request("p1")).unwrap();
        let err = gate
            .resolve(&approval.id, Decision::Approved, "  ", None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn overdue_approval_expires_lazily_on_read() {
        let gate = gate();
        let mut req = request("p1");
        req.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let approval = gate.request_approval(req).unwrap();

        let read = gate.get(&approval.id).unwrap().unwrap();
        assert_eq!(read.status, ApprovalStatus::Expired);
        assert!(gate.list_pending("p1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_approval_cannot_be_reopened() {
        let gate = gate();
        let mut req = request("p1");
        req.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let approval = gate.request_approval(req).unwrap();

        let err = gate
            .resolve(&approval.id, Decision::Approved, "admin", None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApprovalNotPending);
    }

    #[tokio::test]
    async fn waiter_sees_expiry() {
        let gate = gate();
        let mut req = request("p1");
        req.expires_at = Utc::now() + chrono::Duration::milliseconds(30);
        let approval = gate.request_approval(req).unwrap();

        let status = gate
            .await_resolution(&approval.id, &AbortSignal::new())
            .await
            .unwrap();
        assert_eq!(status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn abort_cancels_wait() {
        let gate = gate();
        let approval = gate.request_approval(request("p1")).unwrap();

        let abort = AbortSignal::new();
        abort.abort();
        let err = gate
            .await_resolution(&approval.id, &abort)
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::Cancelled));
    }

    #[tokio::test]
    async fn sweeper_expires_in_bulk() {
        let gate = gate();
        for _ in 0..3 {
            let mut req = request("p1");
            req.expires_at = Utc::now() - chrono::Duration::seconds(1);
            gate.request_approval(req).unwrap();
        }
        gate.request_approval(request("p1")).unwrap();

        assert_eq!(gate.sweep_expired().unwrap(), 3);
        assert_eq!(gate.list_pending("p1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolving_unknown_approval_is_not_found() {
        let gate = gate();
        let err = gate
            .resolve("nope", Decision::Approved, "admin", None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
