//! # Payload Transformation
//!
//! The downstream build system understands push payloads only. Comment events
//! are rewritten into a push-shaped envelope that points at the repository's
//! default branch and carries the commenter's email as author and committer.
//! Every other event passes through byte-for-byte.
//!
//! Enrichment lookups are best-effort: a failed branch or email lookup falls
//! back to a local default, and a failed installation lookup abandons the
//! rewrite. The transformer never returns an error.

use std::sync::Arc;

use bytes::Bytes;
use github_app_client::client::{noreply_address, DEFAULT_BRANCH_FALLBACK};
use github_app_client::IdentityProvider;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

/// Event type rewritten into a push envelope.
pub const REWRITTEN_EVENT: &str = "issue_comment";

/// Event type the downstream consumer understands.
pub const CANONICAL_EVENT: &str = "push";

/// Commit id placed in the synthesized head commit.
pub const HEAD_COMMIT_ID: &str = "HEAD";

/// Commit message placed in the synthesized head commit.
pub const HEAD_COMMIT_MESSAGE: &str = "GitHub issue_comment event";

// ============================================================================
// Outcome Types
// ============================================================================

/// Why a body was forwarded unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    /// The event type is not rewritten.
    EventNotRewritten,
    /// The body is not valid JSON.
    MalformedJson,
    /// Repository owner, repository name or commenter login is missing.
    MissingContext,
    /// The app installation for the repository could not be resolved.
    InstallationUnavailable,
}

/// A looked-up value, tagged with whether the lookup succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enriched<T> {
    Resolved(T),
    Fallback(T),
}

impl<T> Enriched<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::Resolved(value) | Self::Fallback(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Resolved(value) | Self::Fallback(value) => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Result of transforming one delivery body.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// The original bytes, unchanged.
    Passthrough {
        body: Bytes,
        reason: PassthroughReason,
    },
    /// A synthesized push envelope.
    Rewritten {
        body: Bytes,
        branch: Enriched<String>,
        email: Enriched<Option<String>>,
    },
}

impl TransformOutcome {
    /// Body to forward downstream.
    pub fn body(&self) -> &Bytes {
        match self {
            Self::Passthrough { body, .. } | Self::Rewritten { body, .. } => body,
        }
    }

    pub fn into_body(self) -> Bytes {
        match self {
            Self::Passthrough { body, .. } | Self::Rewritten { body, .. } => body,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, Self::Rewritten { .. })
    }
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Serialize)]
struct PushEnvelope<'a> {
    original_payload: &'a Value,
    #[serde(rename = "ref")]
    git_ref: String,
    repository: &'a Value,
    head_commit: HeadCommit<'a>,
}

#[derive(Debug, Serialize)]
struct HeadCommit<'a> {
    id: &'static str,
    message: &'static str,
    author: CommitIdentity<'a>,
    committer: CommitIdentity<'a>,
    added: [&'static str; 0],
    removed: [&'static str; 0],
    modified: [&'static str; 0],
}

#[derive(Debug, Clone, Copy, Serialize)]
struct CommitIdentity<'a> {
    email: Option<&'a str>,
}

/// Fields needed to enrich a comment event.
struct CommentContext<'a> {
    owner: &'a str,
    repo: &'a str,
    commenter: &'a str,
}

impl<'a> CommentContext<'a> {
    fn from_payload(payload: &'a Value) -> Option<Self> {
        Some(Self {
            owner: payload.pointer("/repository/owner/login")?.as_str()?,
            repo: payload.pointer("/repository/name")?.as_str()?,
            commenter: payload.pointer("/comment/user/login")?.as_str()?,
        })
    }
}

// ============================================================================
// Transformer
// ============================================================================

/// Rewrites comment deliveries into push envelopes.
#[derive(Clone)]
pub struct PayloadTransformer {
    identity: Arc<dyn IdentityProvider>,
}

impl PayloadTransformer {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    /// Transform a delivery body of the given event type.
    #[instrument(skip(self, body), fields(body_len = body.len()))]
    pub async fn transform(&self, event_type: &str, body: Bytes) -> TransformOutcome {
        if event_type != REWRITTEN_EVENT {
            return TransformOutcome::Passthrough {
                body,
                reason: PassthroughReason::EventNotRewritten,
            };
        }

        let payload: Value = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Comment event body is not valid JSON, forwarding unchanged");
                return TransformOutcome::Passthrough {
                    body,
                    reason: PassthroughReason::MalformedJson,
                };
            }
        };

        let Some(context) = CommentContext::from_payload(&payload) else {
            warn!("Comment event lacks repository or commenter, forwarding unchanged");
            return TransformOutcome::Passthrough {
                body,
                reason: PassthroughReason::MissingContext,
            };
        };

        let installation_id = match self
            .identity
            .resolve_installation(context.owner, context.repo)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    owner = context.owner,
                    repo = context.repo,
                    error = %e,
                    "Installation lookup failed, forwarding comment event unchanged"
                );
                return TransformOutcome::Passthrough {
                    body,
                    reason: PassthroughReason::InstallationUnavailable,
                };
            }
        };

        let lookups = self.identity.installation_scope(installation_id);
        let (branch, email) = tokio::join!(
            lookups.default_branch(context.owner, context.repo),
            lookups.user_email(context.commenter),
        );

        let branch = match branch {
            Ok(branch) => Enriched::Resolved(branch),
            Err(e) => {
                warn!(
                    owner = context.owner,
                    repo = context.repo,
                    error = %e,
                    "Default branch lookup failed, using fallback"
                );
                Enriched::Fallback(DEFAULT_BRANCH_FALLBACK.to_string())
            }
        };

        let email = match email {
            Ok(email) => Enriched::Resolved(email),
            Err(e) => {
                warn!(
                    username = context.commenter,
                    error = %e,
                    "Email lookup failed, using no-reply address"
                );
                Enriched::Fallback(Some(noreply_address(context.commenter)))
            }
        };

        let identity = CommitIdentity {
            email: email.value().as_deref(),
        };
        let envelope = PushEnvelope {
            original_payload: &payload,
            git_ref: format!("refs/heads/{}", branch.value()),
            repository: &payload["repository"],
            head_commit: HeadCommit {
                id: HEAD_COMMIT_ID,
                message: HEAD_COMMIT_MESSAGE,
                author: identity,
                committer: identity,
                added: [],
                removed: [],
                modified: [],
            },
        };

        let rewritten = match serde_json::to_vec(&envelope) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "Failed to serialize push envelope, forwarding unchanged");
                return TransformOutcome::Passthrough {
                    body,
                    reason: PassthroughReason::MalformedJson,
                };
            }
        };

        info!(
            owner = context.owner,
            repo = context.repo,
            installation_id = %installation_id,
            branch = %branch.value(),
            branch_fallback = branch.is_fallback(),
            email_fallback = email.is_fallback(),
            "Rewrote comment event as push"
        );

        TransformOutcome::Rewritten {
            body: rewritten,
            branch,
            email,
        }
    }
}

impl std::fmt::Debug for PayloadTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadTransformer").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
