//! Session credential boundary.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::error::QueryError;

/// Holds the current API credential. Clones share the same credential.
#[derive(Clone, Default)]
pub struct Session {
  credential: Arc<RwLock<Option<String>>>,
}

impl Session {
  pub fn new(credential: Option<String>) -> Self {
    Self {
      credential: Arc::new(RwLock::new(credential)),
    }
  }

  pub fn credential(&self) -> Option<String> {
    self
      .credential
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self
      .credential
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  pub fn login(&self, credential: impl Into<String>) {
    *self
      .credential
      .write()
      .unwrap_or_else(PoisonError::into_inner) = Some(credential.into());
  }

  /// Forget the credential. Returns whether there was one.
  pub fn revoke(&self) -> bool {
    self
      .credential
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
      .is_some()
  }

  /// Map a network-boundary failure into what the UI should see.
  ///
  /// Without a credential every failure is `Unauthorized`. A rejected
  /// credential is dropped so later calls fail the same way.
  pub fn classify(&self, error: QueryError) -> QueryError {
    match error {
      QueryError::Unauthorized(reason) => {
        if self.revoke() {
          warn!(%reason, "credential rejected, session revoked");
        }
        QueryError::Unauthorized(reason)
      }
      other if !self.is_authenticated() => {
        QueryError::Unauthorized(format!("not signed in ({})", other))
      }
      other => other,
    }
  }
}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("authenticated", &self.is_authenticated())
      .finish()
  }
}
