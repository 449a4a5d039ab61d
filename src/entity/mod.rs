//! Database entity models.
//!
//! Each submodule is a Sea-ORM entity mapping one table. Timestamps are
//! stored as `TIMESTAMPTZ` and always written in UTC.

/// Anonymous, IP-scoped sessions permitting a limited number of analyses.
pub mod analysis_session;

/// Documents uploaded into a public session and their analysis state.
pub mod document_analysis;

/// Per-IP record of accepted uploads counted by the rate limiter.
pub mod public_upload;

/// Marketplace templates.
pub mod template;

/// Immutable content snapshots of a template.
pub mod template_version;

/// A user's filled-in variable values for a template version.
pub mod template_customization;

/// Cookie session records backing `DbSessionStore`.
pub mod user_session;

/// Audit trail of security-relevant events.
pub mod security_event;

/// Per-request AI token consumption.
pub mod ai_usage_log;
