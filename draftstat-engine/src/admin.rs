//! Shared-token gate in front of administrative operations.
//!
//! This is a placeholder, not authentication: anyone holding the configured
//! token may replace the pool, switch patches and force rotations.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("administrative token rejected")]
    Unauthorized,
}

#[derive(Debug, Clone)]
pub struct AdminGate {
    token: String,
}

impl AdminGate {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// # Errors
    ///
    /// Returns [`AdminError::Unauthorized`] when `presented` does not match.
    pub fn authorize(&self, presented: &str) -> Result<(), AdminError> {
        if presented.trim() == self.token {
            Ok(())
        } else {
            log::warn!("administrative request rejected");
            Err(AdminError::Unauthorized)
        }
    }
}
