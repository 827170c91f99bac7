//! One-time terminal provisioning coordination

use tokio::sync::watch;

/// Provisioning lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl ProvisioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::NotStarted => "NotStarted",
            ProvisioningState::InProgress => "InProgress",
            ProvisioningState::Completed => "Completed",
        }
    }
}

/// Owns the provisioning state
///
/// Exactly one caller at a time wins [`ProvisioningCoordinator::try_begin`];
/// everyone else awaits [`ProvisioningCoordinator::wait_completed`].
#[derive(Debug)]
pub struct ProvisioningCoordinator {
    state: watch::Sender<ProvisioningState>,
}

impl ProvisioningCoordinator {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(ProvisioningState::NotStarted),
        }
    }

    pub fn state(&self) -> ProvisioningState {
        *self.state.borrow()
    }

    /// Move NotStarted to InProgress; `None` if someone else got there first
    pub fn try_begin(&self) -> Option<ProvisioningTicket<'_>> {
        let began = self.state.send_if_modified(|state| {
            if *state == ProvisioningState::NotStarted {
                *state = ProvisioningState::InProgress;
                true
            } else {
                false
            }
        });
        if began {
            log::info!("Provisioning started");
            Some(ProvisioningTicket {
                coordinator: self,
                completed: false,
            })
        } else {
            None
        }
    }

    /// Wait until provisioning has completed
    pub async fn wait_completed(&self) {
        let mut receiver = self.state.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = receiver.wait_for(|state| *state == ProvisioningState::Completed).await;
    }

    fn set(&self, state: ProvisioningState) {
        self.state.send_replace(state);
    }
}

impl Default for ProvisioningCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive right to run provisioning
///
/// Dropping it without [`ProvisioningTicket::complete`] puts the
/// coordinator back to NotStarted so another attempt can begin.
#[derive(Debug)]
pub struct ProvisioningTicket<'a> {
    coordinator: &'a ProvisioningCoordinator,
    completed: bool,
}

impl ProvisioningTicket<'_> {
    pub fn complete(mut self) {
        self.completed = true;
        self.coordinator.set(ProvisioningState::Completed);
        log::info!("Provisioning completed");
    }
}

impl Drop for ProvisioningTicket<'_> {
    fn drop(&mut self) {
        if !self.completed {
            log::warn!("Provisioning abandoned; it can be retried");
            self.coordinator.set(ProvisioningState::NotStarted);
        }
    }
}
