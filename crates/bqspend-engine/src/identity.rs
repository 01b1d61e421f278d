//! Actor classification.

use bqspend_config::EngineConfig;

use crate::models::{ActorIdentity, ActorKind};

/// Canonical key for records with no usable actor email.
pub const UNKNOWN_ACTOR: &str = "Unknown";

/// Naming patterns that mark an email as a service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountRules {
    domain_suffixes: Vec<String>,
    prefixes: Vec<String>,
}

impl ServiceAccountRules {
    pub fn new(domain_suffixes: Vec<String>, prefixes: Vec<String>) -> Self {
        Self {
            domain_suffixes: domain_suffixes.iter().map(|s| s.to_lowercase()).collect(),
            prefixes: prefixes.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.service_account_domain_suffixes.clone(),
            config.service_account_prefixes.clone(),
        )
    }

    /// Classify an email. Blank input is a human user named [`UNKNOWN_ACTOR`].
    pub fn classify(&self, actor_email: &str) -> ActorIdentity {
        let email = actor_email.trim();
        if email.is_empty() {
            return ActorIdentity {
                canonical_key: UNKNOWN_ACTOR.to_string(),
                kind: ActorKind::User,
            };
        }

        let lowered = email.to_lowercase();
        let is_service_account = self.domain_suffixes.iter().any(|s| lowered.ends_with(s))
            || self.prefixes.iter().any(|p| lowered.starts_with(p));

        ActorIdentity {
            canonical_key: email.to_string(),
            kind: if is_service_account {
                ActorKind::ServiceAccount
            } else {
                ActorKind::User
            },
        }
    }
}

impl Default for ServiceAccountRules {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
