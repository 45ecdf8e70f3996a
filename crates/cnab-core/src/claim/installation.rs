use super::{Claim, ClaimResult, Status};

/// Everything recorded for one named installation.
#[derive(Debug, Clone)]
pub struct Installation {
    pub name: String,
    /// Claims in creation order (oldest first).
    pub claims: Vec<Claim>,
    /// Results of the latest claim, in creation order.
    pub latest_results: Vec<ClaimResult>,
}

impl Installation {
    pub fn latest_claim(&self) -> Option<&Claim> {
        self.claims.last()
    }

    pub fn latest_result(&self) -> Option<&ClaimResult> {
        self.latest_results.last()
    }

    /// Status of the most recent attempt, `unknown` when nothing ran yet.
    pub fn status(&self) -> Status {
        self.latest_result()
            .map(|r| r.status)
            .unwrap_or(Status::Unknown)
    }

    /// Whether the installation was uninstalled successfully.
    pub fn is_uninstalled(&self) -> bool {
        self.latest_claim()
            .is_some_and(|c| c.action == crate::bundle::ACTION_UNINSTALL)
            && self.status() == Status::Succeeded
    }
}
