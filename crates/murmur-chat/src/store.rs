//! Single-writer container around the interaction reducer.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::interaction::{ChatAction, ChatInteractionState, reduce};

/// Owns the current [`ChatInteractionState`] and applies actions to it in
/// dispatch order.
///
/// Observers subscribe to a broadcast of every new state value; a state is
/// only broadcast when an action actually changed it.
pub struct ChatStore {
    state: Arc<ChatInteractionState>,
    queue_tx: mpsc::UnboundedSender<ChatAction>,
    queue_rx: mpsc::UnboundedReceiver<ChatAction>,
    change_tx: broadcast::Sender<Arc<ChatInteractionState>>,
}

/// A cloneable endpoint for queueing actions from other tasks.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<ChatAction>,
}

impl StoreHandle {
    /// Queue an action for the store's next [`ChatStore::process_pending`].
    ///
    /// Returns `false` if the store has been dropped.
    pub fn dispatch(&self, action: ChatAction) -> bool {
        let name = action.name();
        if self.tx.send(action).is_err() {
            tracing::warn!("Chat store is gone, dropping {} action", name);
            return false;
        }
        true
    }
}

impl ChatStore {
    /// Create a store holding the initial state
    pub fn new() -> Self {
        Self::with_state(ChatInteractionState::default())
    }

    /// Create a store holding the given state
    pub fn with_state(state: ChatInteractionState) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (change_tx, _) = broadcast::channel(64);
        Self {
            state: Arc::new(state),
            queue_tx,
            queue_rx,
            change_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> Arc<ChatInteractionState> {
        Arc::clone(&self.state)
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChatInteractionState>> {
        self.change_tx.subscribe()
    }

    /// Get a handle for queueing actions from elsewhere
    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            tx: self.queue_tx.clone(),
        }
    }

    /// Apply an action now and return the resulting state
    pub fn dispatch(&mut self, action: ChatAction) -> Arc<ChatInteractionState> {
        let name = action.name();
        let next = reduce(&self.state, action);

        if Arc::ptr_eq(&next, &self.state) {
            tracing::trace!("{} left chat state unchanged", name);
            return next;
        }

        tracing::debug!("{} updated chat state", name);
        self.state = Arc::clone(&next);
        // No subscribers is fine
        let _ = self.change_tx.send(Arc::clone(&next));
        next
    }

    /// Apply every queued action in the order it was dispatched.
    ///
    /// Returns how many actions were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(action) = self.queue_rx.try_recv() {
            self.dispatch(action);
            applied += 1;
        }
        applied
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}
