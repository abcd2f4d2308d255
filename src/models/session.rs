use garde::Validate;

use crate::error::UsageError;

/// Caller-supplied credentials attached to every backend call.
///
/// The bearer token is opaque: it is minted by the auth collaborator and
/// forwarded verbatim.
#[derive(Clone, Validate)]
pub struct SessionContext {
    #[garde(length(min = 1))]
    bearer_token: String,

    #[garde(length(min = 1, max = 128), pattern(r"^[^ \t\r\n]+$"))]
    tenant_id: String,
}

impl SessionContext {
    pub fn new(
        bearer_token: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Result<Self, UsageError> {
        let session = Self {
            bearer_token: bearer_token.into(),
            tenant_id: tenant_id.into(),
        };
        session
            .validate()
            .map_err(|e| UsageError::InvalidSession(e.to_string()))?;
        Ok(session)
    }

    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("bearer_token", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}
