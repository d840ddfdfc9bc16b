//! Shared error type for pure domain-level failures.
//!
//! Store, dispatch, and scheduler failures get their own error types in
//! their respective crates (see SPEC_FULL.md §7); this one covers failures
//! that can occur while manipulating domain values with no I/O involved.

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("unresolved template variables: {0:?}")]
    TemplateResolution(Vec<String>),

    #[error("invalid step index transition: {0}")]
    InvalidTransition(String),
}
