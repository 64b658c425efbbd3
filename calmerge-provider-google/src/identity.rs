//! The platform account picker Google sign-in goes through.

use async_trait::async_trait;

use calmerge_core::AuthFailure;
use calmerge_core::auth::TokenGrant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    pub email: String,
    pub display_name: Option<String>,
}

/// Host-side credential broker (an Android credential manager, a desktop
/// account list, ...).
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    /// Let the user pick a Google identity. `Ok(None)` means the broker leaves
    /// the choice to the consent page.
    async fn sign_in(&self) -> Result<Option<GoogleIdentity>, AuthFailure>;

    /// A calendar grant for `email` without showing any UI, if the platform
    /// can issue one.
    async fn silent_authorization(
        &self,
        _email: &str,
        _scopes: &[&str],
    ) -> Result<Option<TokenGrant>, AuthFailure> {
        Ok(None)
    }
}

/// Broker for hosts without an account picker: every login goes through the
/// consent page, optionally preselecting `login_hint`.
#[derive(Debug, Clone, Default)]
pub struct ConsentPageBroker {
    login_hint: Option<String>,
}

impl ConsentPageBroker {
    pub fn new(login_hint: Option<String>) -> Self {
        ConsentPageBroker { login_hint }
    }
}

#[async_trait]
impl IdentityBroker for ConsentPageBroker {
    async fn sign_in(&self) -> Result<Option<GoogleIdentity>, AuthFailure> {
        Ok(self.login_hint.as_ref().map(|email| GoogleIdentity {
            email: email.clone(),
            display_name: None,
        }))
    }
}
