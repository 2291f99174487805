//! Per-consumer view of one user's trial access.
//!
//! The tracker follows a changing user identifier and keeps the latest
//! resolved status. Every refresh takes a new epoch; a lookup result is only
//! applied if no newer refresh started while it was in flight, so a slow
//! response for a previous user can never overwrite the current one.
//!
//! This is library API for long-lived consumers embedding the crate (a
//! session or connection handler following its signed-in user). The HTTP
//! service is stateless per request and resolves through
//! [`TrialResolver`] directly.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::trial::resolver::TrialResolver;
use crate::trial::types::TrialStatus;

/// Snapshot handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialAccessView {
    pub user_id: Option<String>,
    pub status: TrialStatus,
    pub is_loading: bool,
    pub has_access: bool,
    pub is_expired: bool,
    pub days_remaining: u32,
}

#[derive(Debug, Default)]
struct TrackerState {
    epoch: u64,
    user_id: Option<String>,
    status: TrialStatus,
    is_loading: bool,
}

impl TrackerState {
    fn view(&self) -> TrialAccessView {
        TrialAccessView {
            user_id: self.user_id.clone(),
            status: self.status.clone(),
            is_loading: self.is_loading,
            has_access: self.status.has_access(),
            is_expired: self.status.is_expired,
            days_remaining: self.status.days_remaining,
        }
    }

    /// Open a new epoch. Returns the lookup to perform, or `None` when there
    /// is no user and the default status was applied directly.
    fn begin(&mut self) -> Option<(u64, String)> {
        self.epoch += 1;
        match self.user_id.clone() {
            Some(user_id) => {
                self.is_loading = true;
                Some((self.epoch, user_id))
            }
            None => {
                self.status = TrialStatus::none();
                self.is_loading = false;
                None
            }
        }
    }
}

pub struct TrialAccessTracker {
    resolver: Arc<TrialResolver>,
    state: RwLock<TrackerState>,
}

impl TrialAccessTracker {
    pub fn new(resolver: Arc<TrialResolver>) -> Self {
        Self {
            resolver,
            state: RwLock::new(TrackerState::default()),
        }
    }

    /// Switch to a different user (or none) and resolve their status.
    /// An empty identifier is treated as no user.
    pub async fn set_user(&self, user_id: Option<String>) -> TrialAccessView {
        let ticket = {
            let mut state = self.state.write().await;
            state.user_id = user_id.filter(|id| !id.is_empty());
            state.begin()
        };
        self.complete(ticket).await
    }

    /// Re-resolve the current user's status.
    pub async fn refresh(&self) -> TrialAccessView {
        let ticket = self.state.write().await.begin();
        self.complete(ticket).await
    }

    pub async fn snapshot(&self) -> TrialAccessView {
        self.state.read().await.view()
    }

    async fn complete(&self, ticket: Option<(u64, String)>) -> TrialAccessView {
        let Some((epoch, user_id)) = ticket else {
            return self.snapshot().await;
        };

        let status = self.resolver.get_trial_status(&user_id).await;

        let mut state = self.state.write().await;
        if state.epoch == epoch {
            state.status = status;
            state.is_loading = false;
        } else {
            tracing::debug!(
                user_id = %user_id,
                epoch,
                current_epoch = state.epoch,
                "Discarding superseded trial status"
            );
        }
        state.view()
    }
}
