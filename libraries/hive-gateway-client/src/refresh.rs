//! Single-flight token refresh.
//!
//! When a request is rejected with 401 the coordinator decides whether the
//! session can be recovered. At most one refresh call is in flight at any
//! time; every request rejected while it runs waits on the same outcome and
//! is then replayed once (or surfaced as unauthorized if the refresh failed).

use crate::error::Result;
use crate::interceptor::RequestDescriptor;
use crate::session::SessionStore;
use crate::types::RefreshTokenResponse;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse>;
}

/// Observable state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
    /// Transient: the refresh failed and the session is being cleared
    Failed,
}

/// What the caller should do with a request that received a 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Credentials were renewed; replay the request once.
    Replay,
    /// Give up and surface an unauthorized outcome.
    Reject { session_expired: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    Failed,
}

type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

enum Slot {
    Idle,
    Refreshing(OutcomeReceiver),
    Failed,
}

/// Owns the refresh state machine and is the only writer of the session.
pub struct RefreshCoordinator {
    session: Arc<dyn SessionStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_path: String,
    slot: Arc<Mutex<Slot>>,
    refreshes: Arc<AtomicU64>,
}

impl RefreshCoordinator {
    pub fn new(
        session: Arc<dyn SessionStore>,
        refresher: Arc<dyn TokenRefresher>,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            session,
            refresher,
            refresh_path: refresh_path.into(),
            slot: Arc::new(Mutex::new(Slot::Idle)),
            refreshes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> RefreshState {
        match &*lock(&self.slot) {
            Slot::Idle => RefreshState::Idle,
            Slot::Refreshing(_) => RefreshState::Refreshing,
            Slot::Failed => RefreshState::Failed,
        }
    }

    /// Number of refresh calls started since the coordinator was created.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Whether `request` targets the refresh endpoint itself.
    pub fn is_refresh_request(&self, request: &RequestDescriptor) -> bool {
        let target = self.refresh_path.trim_matches('/');
        !target.is_empty() && request.path.contains(target)
    }

    /// Store tokens obtained outside a refresh (e.g. after login).
    pub fn establish_session(&self, access_token: &str, refresh_token: Option<&str>) {
        self.session.set_tokens(access_token, refresh_token);
        info!("Session established");
    }

    /// Drop the session.
    pub fn end_session(&self) {
        self.session.clear();
        info!("Session cleared");
    }

    /// Decide how to handle a 401 received for `request`.
    ///
    /// Waits for the in-flight refresh when one is running, starting one if
    /// needed.
    pub async fn recover(&self, request: &RequestDescriptor) -> Recovery {
        if request.is_retried() || self.is_refresh_request(request) {
            debug!(
                path = %request.path,
                retried = request.is_retried(),
                "401 is not recoverable"
            );
            return self.reject();
        }

        let receiver = {
            let mut slot = lock(&self.slot);
            let in_flight = match &*slot {
                Slot::Refreshing(receiver) => Some(receiver.clone()),
                // The failed refresh is still clearing the session; its
                // refresh token is dead.
                Slot::Failed => {
                    debug!(path = %request.path, "Token refresh just failed, not retrying");
                    return Recovery::Reject {
                        session_expired: true,
                    };
                }
                Slot::Idle => None,
            };

            match in_flight {
                Some(receiver) => {
                    debug!(path = %request.path, "Waiting on in-flight token refresh");
                    receiver
                }
                None => {
                    // The token was renewed after this request went out.
                    if let Some(current) = self.session.access_token() {
                        if request.sent_token() != Some(current.as_str()) {
                            debug!(path = %request.path, "Access token already renewed, replaying");
                            return Recovery::Replay;
                        }
                    }

                    let Some(refresh_token) = self.session.refresh_token() else {
                        drop(slot);
                        debug!(path = %request.path, "No refresh token available");
                        return self.reject();
                    };

                    let receiver = self.spawn_refresh(refresh_token);
                    *slot = Slot::Refreshing(receiver.clone());
                    receiver
                }
            }
        };

        match wait_for_outcome(receiver).await {
            RefreshOutcome::Refreshed => Recovery::Replay,
            RefreshOutcome::Failed => Recovery::Reject {
                session_expired: true,
            },
        }
    }

    fn reject(&self) -> Recovery {
        if self.session.is_authenticated() || self.session.refresh_token().is_some() {
            self.end_session();
        }
        Recovery::Reject {
            session_expired: false,
        }
    }

    /// Run the refresh call on its own task so it completes even if the
    /// request that started it is dropped.
    fn spawn_refresh(&self, refresh_token: String) -> OutcomeReceiver {
        let (sender, receiver) = watch::channel(None);
        let session = Arc::clone(&self.session);
        let refresher = Arc::clone(&self.refresher);
        let slot = Arc::clone(&self.slot);

        let attempt = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(attempt, "Access token rejected, refreshing session");

        tokio::spawn(async move {
            let outcome = match refresher.refresh(&refresh_token).await {
                Ok(tokens) => {
                    session.set_tokens(&tokens.access_token, tokens.refresh_token.as_deref());
                    *lock(&slot) = Slot::Idle;
                    info!(
                        expires_in = tokens.expires_in,
                        rotated = tokens.refresh_token.is_some(),
                        "Token refresh successful"
                    );
                    RefreshOutcome::Refreshed
                }
                Err(e) => {
                    *lock(&slot) = Slot::Failed;
                    warn!(error = %e, "Token refresh failed, clearing session");
                    session.clear();
                    *lock(&slot) = Slot::Idle;
                    RefreshOutcome::Failed
                }
            };
            sender.send_replace(Some(outcome));
        });

        receiver
    }
}

async fn wait_for_outcome(mut receiver: OutcomeReceiver) -> RefreshOutcome {
    // A closed channel means the refresh task went away without reporting
    receiver
        .wait_for(Option::is_some)
        .await
        .map_or(RefreshOutcome::Failed, |outcome| {
            (*outcome).unwrap_or(RefreshOutcome::Failed)
        })
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::session::MemorySessionStore;
    use reqwest::Method;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Refresher that counts calls and waits for a go signal before answering.
    struct GatedRefresher {
        calls: AtomicU64,
        gate: Notify,
        succeed: bool,
    }

    impl GatedRefresher {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                gate: Notify::new(),
                succeed,
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.succeed {
                Ok(RefreshTokenResponse {
                    access_token: format!("fresh-from-{}", refresh_token),
                    expires_in: 3600,
                    refresh_token: None,
                })
            } else {
                Err(ApiError::unauthorized(true))
            }
        }
    }

    fn sent_with(token: Option<&str>, path: &str) -> RequestDescriptor {
        let store: Arc<dyn SessionStore> = Arc::new(match token {
            Some(t) => MemorySessionStore::with_tokens(t, None),
            None => MemorySessionStore::new(),
        });
        let mut request = RequestDescriptor::new(Method::GET, path);
        crate::interceptor::RequestInterceptor::new(store).apply(&mut request);
        request
    }

    fn coordinator(
        session: Arc<MemorySessionStore>,
        refresher: Arc<GatedRefresher>,
    ) -> Arc<RefreshCoordinator> {
        Arc::new(RefreshCoordinator::new(session, refresher, "/auth/refresh"))
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let session = Arc::new(MemorySessionStore::with_tokens(
            "stale",
            Some("r1".to_string()),
        ));
        let refresher = GatedRefresher::new(true);
        let coordinator = coordinator(session.clone(), refresher.clone());

        let mut waiters = Vec::new();
        for i in 0..5 {
            let coordinator = coordinator.clone();
            let request = sent_with(Some("stale"), &format!("/items/{}", i));
            waiters.push(tokio::spawn(async move {
                coordinator.recover(&request).await
            }));
        }

        // Let every waiter park on the refresh before releasing it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.state(), RefreshState::Refreshing);
        refresher.gate.notify_one();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Recovery::Replay);
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresh_count(), 1);
        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert_eq!(session.access_token().as_deref(), Some("fresh-from-r1"));
        assert_eq!(session.refresh_token().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_session() {
        let session = Arc::new(MemorySessionStore::with_tokens(
            "stale",
            Some("r1".to_string()),
        ));
        let refresher = GatedRefresher::new(false);
        let coordinator = coordinator(session.clone(), refresher.clone());

        let first = {
            let coordinator = coordinator.clone();
            let request = sent_with(Some("stale"), "/a");
            tokio::spawn(async move { coordinator.recover(&request).await })
        };
        let second = {
            let coordinator = coordinator.clone();
            let request = sent_with(Some("stale"), "/b");
            tokio::spawn(async move { coordinator.recover(&request).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        refresher.gate.notify_one();

        let expired = Recovery::Reject {
            session_expired: true,
        };
        assert_eq!(first.await.unwrap(), expired);
        assert_eq!(second.await.unwrap(), expired);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(!session.is_authenticated());
        assert!(session.refresh_token().is_none());
        assert_eq!(coordinator.state(), RefreshState::Idle);

        // Nothing left to refresh with.
        let request = sent_with(Some("stale"), "/c");
        assert_eq!(
            coordinator.recover(&request).await,
            Recovery::Reject {
                session_expired: false
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retried_request_never_refreshes() {
        let session = Arc::new(MemorySessionStore::with_tokens(
            "stale",
            Some("r1".to_string()),
        ));
        let refresher = GatedRefresher::new(true);
        let coordinator = coordinator(session.clone(), refresher.clone());

        let mut request = sent_with(Some("stale"), "/a");
        request.mark_retried();

        assert_eq!(
            coordinator.recover(&request).await,
            Recovery::Reject {
                session_expired: false
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_endpoint_is_not_recovered() {
        let session = Arc::new(MemorySessionStore::with_tokens(
            "stale",
            Some("r1".to_string()),
        ));
        let refresher = GatedRefresher::new(true);
        let coordinator = coordinator(session, refresher.clone());

        let request = sent_with(Some("stale"), "/auth/refresh");
        assert!(coordinator.is_refresh_request(&request));
        assert!(matches!(
            coordinator.recover(&request).await,
            Recovery::Reject { .. }
        ));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_refresh_token_rejects() {
        let session = Arc::new(MemorySessionStore::with_tokens("stale", None));
        let refresher = GatedRefresher::new(true);
        let coordinator = coordinator(session, refresher.clone());

        let request = sent_with(Some("stale"), "/a");
        assert_eq!(
            coordinator.recover(&request).await,
            Recovery::Reject {
                session_expired: false
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_renewed_token_replays_without_refresh() {
        let session = Arc::new(MemorySessionStore::with_tokens(
            "fresh",
            Some("r1".to_string()),
        ));
        let refresher = GatedRefresher::new(true);
        let coordinator = coordinator(session, refresher.clone());

        let request = sent_with(Some("stale"), "/a");
        assert_eq!(coordinator.recover(&request).await, Recovery::Replay);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    /// Session store whose `clear` blocks, keeping a failed refresh in `Failed`.
    struct SlowClearStore {
        inner: MemorySessionStore,
        delay: Duration,
    }

    impl SessionStore for SlowClearStore {
        fn access_token(&self) -> Option<String> {
            self.inner.access_token()
        }

        fn refresh_token(&self) -> Option<String> {
            self.inner.refresh_token()
        }

        fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
            self.inner.set_tokens(access_token, refresh_token);
        }

        fn clear(&self) {
            std::thread::sleep(self.delay);
            self.inner.clear();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_401_while_failed_does_not_refresh_again() {
        let session = Arc::new(SlowClearStore {
            inner: MemorySessionStore::with_tokens("stale", Some("r1".to_string())),
            delay: Duration::from_millis(300),
        });
        let refresher = GatedRefresher::new(false);
        let coordinator = Arc::new(RefreshCoordinator::new(
            session.clone(),
            refresher.clone(),
            "/auth/refresh",
        ));

        let first = {
            let coordinator = coordinator.clone();
            let request = sent_with(Some("stale"), "/a");
            tokio::spawn(async move { coordinator.recover(&request).await })
        };
        refresher.gate.notify_one();

        tokio::time::timeout(Duration::from_secs(2), async {
            while coordinator.state() != RefreshState::Failed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("refresh never reached Failed");

        // The dead refresh token is still stored while the session clears.
        assert_eq!(session.refresh_token().as_deref(), Some("r1"));
        let request = sent_with(Some("stale"), "/b");
        assert_eq!(
            coordinator.recover(&request).await,
            Recovery::Reject {
                session_expired: true
            }
        );

        assert_eq!(
            first.await.unwrap(),
            Recovery::Reject {
                session_expired: true
            }
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresh_count(), 1);
        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert!(session.refresh_token().is_none());
    }
}
