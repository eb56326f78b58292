//! Caller identity resolution.
//!
//! The executor never reads auth state directly; it asks an
//! `IdentityResolver`. Background jobs carry the submitting user's id on the
//! job row and use `ExplicitIdentity`, which needs no session at all.
//! Interactive callers resolve through `SessionIdentity`.

use async_trait::async_trait;

use crate::error::IdentityError;

/// Resolves the user a piece of work runs as.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self) -> Result<String, IdentityError>;
}

/// Identity fixed at job-creation time. Always resolves.
pub struct ExplicitIdentity(pub String);

#[async_trait]
impl IdentityResolver for ExplicitIdentity {
    async fn resolve(&self) -> Result<String, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Source of the currently authenticated user, if any.
pub trait SessionSource: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Resolves identity from an active session; fails with `NoSession` when
/// nobody is signed in.
pub struct SessionIdentity<S: SessionSource> {
    source: S,
}

impl<S: SessionSource> SessionIdentity<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: SessionSource> IdentityResolver for SessionIdentity<S> {
    async fn resolve(&self) -> Result<String, IdentityError> {
        self.source.current_user().ok_or(IdentityError::NoSession)
    }
}
