//! Session Store
//!
//! Sole holder of the `Session` of one application instance. Use cases
//! write it after a gateway call resolves; pages and the route guard read it.
//!
//! Once the initial session check has resolved, the session never goes back
//! to loading. `set` refuses such a transition and logs it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::entity::{Session, UserRecord};

type Callback = Arc<dyn Fn(&Session) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    entries: BTreeMap<u64, Callback>,
}

/// Observable holder of the current session
pub struct SessionStore {
    tx: watch::Sender<Session>,
    callbacks: Arc<Mutex<Callbacks>>,
}

impl SessionStore {
    /// New store in the loading state
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Session::loading());
        Self {
            tx,
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
        }
    }

    /// Snapshot of the current session
    pub fn get(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Replace the session and notify subscribers
    ///
    /// Returns whether the stored value changed. Setting an equal session is
    /// a no-op; going back to loading after resolution is refused.
    pub fn set(&self, session: Session) -> bool {
        self.update(session, false)
    }

    fn update(&self, session: Session, only_while_loading: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if only_while_loading && !current.is_loading() {
                return false;
            }
            if session.is_loading() && !current.is_loading() {
                tracing::warn!("Refusing to put a resolved session back into loading");
                return false;
            }
            if *current == session {
                return false;
            }
            *current = session.clone();
            true
        });

        if changed {
            tracing::debug!(
                is_authenticated = session.is_authenticated(),
                user_id = session.user_id().unwrap_or("-"),
                "Session updated"
            );
            self.notify(&session);
        }
        changed
    }

    /// Finish the initial check with whatever it found
    ///
    /// No-op once the session has resolved, so a slow check cannot
    /// overwrite a sign-in that completed first.
    pub fn resolve(&self, user: Option<UserRecord>) -> bool {
        self.update(Session::resolved(user), true)
    }

    pub fn authenticate(&self, user: UserRecord) -> bool {
        self.set(Session::authenticated(user))
    }

    /// Signed out (also ends loading)
    pub fn clear(&self) -> bool {
        self.set(Session::anonymous())
    }

    /// Receiver for async consumers
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Call `callback` after every change, until the returned handle is
    /// dropped or unsubscribed
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let id = callbacks.next_id;
        callbacks.next_id += 1;
        callbacks.entries.insert(id, Arc::new(callback));

        Subscription {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Wait up to `within` for the initial check, then return the session
    /// whatever its state
    pub async fn wait_until_loaded(&self, within: Duration) -> Session {
        let mut rx = self.tx.subscribe();
        let _ = tokio::time::timeout(within, rx.wait_for(|s| !s.is_loading())).await;
        self.get()
    }

    fn notify(&self, session: &Session) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe
        let callbacks: Vec<Callback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            callback(session);
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &*self.tx.borrow())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle of a store subscription; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    callbacks: Weak<Mutex<Callbacks>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
