use crate::model::FeedState;

/// Callback notified when a monitor is paused or resumed
///
/// Called synchronously from whichever task performed the change, after the
/// registry lock has been released. Implementations must be cheap and must not
/// call back into the registry.
pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, entity_id: &str, state: FeedState);
}

impl<F> StateObserver for F
where
    F: Fn(&str, FeedState) + Send + Sync,
{
    fn on_state_change(&self, entity_id: &str, state: FeedState) {
        self(entity_id, state)
    }
}
