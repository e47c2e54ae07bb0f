//! Dispute-resolution authorization policy.
//!
//! Privileged identities are loaded from configuration, never hard-coded.
//! The policy is consulted by the dispute resolution service before any
//! forced transition or fund recovery.

use std::collections::HashSet;
use std::env;

use tracing::{info, warn};

/// Set of identities allowed to resolve disputes and recover stranded funds.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    admin_ids: HashSet<String>,
}

impl AdminPolicy {
    pub fn new(admin_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            admin_ids: admin_ids.into_iter().collect(),
        }
    }

    /// Load the policy from `ADMIN_IDS` (comma-separated identity list).
    pub fn from_env() -> Self {
        let ids: HashSet<String> = env::var("ADMIN_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if ids.is_empty() {
            warn!("ADMIN_IDS is empty; dispute resolution is disabled until configured");
        } else {
            info!("Admin policy loaded with {} identities", ids.len());
        }
        Self { admin_ids: ids }
    }

    pub fn is_admin(&self, identity: &str) -> bool {
        self.admin_ids.contains(identity)
    }

    pub fn is_empty(&self) -> bool {
        self.admin_ids.is_empty()
    }
}
