//! Local, ordered copy of the announced results, kept in sync with a
//! [`ResultSource`].
//!
//! Every subscription runs one background task. The task does the initial
//! fetch, then waits for change notifications (or manual refresh requests)
//! and re-reads the whole collection for each. Because a single task does all
//! fetching, fetches never overlap: notifications that arrive while a fetch
//! is in flight are coalesced into one follow-up fetch, and the visible list
//! always reflects the latest completed read.
//!
//! Callbacks live behind a mutex that `stop` empties before aborting the
//! task, so once `stop` returns no callback can run again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::source::ResultSource;
use crate::db::models::{sort_newest_first, ChangeEvent, ResultItem};
use crate::error::FetchError;

/// Upper bound for one read of the collection.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

type ChangeCallback = Box<dyn Fn(Vec<ResultItem>) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&FetchError) + Send + Sync>;

struct Callbacks {
    on_change: ChangeCallback,
    on_error: ErrorCallback,
}

/// Health of the sync loop, surfaced on the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub source: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub fetch_count: u64,
    pub result_count: usize,
}

/// State shared by the store and all of its subscription tasks.
struct Shared {
    snapshot: RwLock<Vec<ResultItem>>,
    status: RwLock<SyncStatus>,
}

pub struct ResultStore {
    source: Arc<dyn ResultSource>,
    shared: Arc<Shared>,
}

impl ResultStore {
    pub fn new(source: Arc<dyn ResultSource>) -> Self {
        let status = SyncStatus {
            source: source.name().to_string(),
            ..SyncStatus::default()
        };
        ResultStore {
            source,
            shared: Arc::new(Shared {
                snapshot: RwLock::new(Vec::new()),
                status: RwLock::new(status),
            }),
        }
    }

    /// Begin observing the source.
    ///
    /// Subscribes to change notifications first, then fetches the full list
    /// and hands it to `on_change`. Every later insert/update triggers another
    /// full fetch. Failed fetches go to `on_error` and leave the current
    /// snapshot untouched.
    pub fn start<C, E>(&self, on_change: C, on_error: E) -> SubscriptionHandle
    where
        C: Fn(Vec<ResultItem>) + Send + Sync + 'static,
        E: Fn(&FetchError) + Send + Sync + 'static,
    {
        let callbacks = Arc::new(Mutex::new(Some(Callbacks {
            on_change: Box::new(on_change),
            on_error: Box::new(on_error),
        })));
        let changes = self.source.subscribe();
        let (refresh_tx, refresh_rx) = mpsc::channel(1);

        let task = tokio::spawn(sync_loop(
            Arc::clone(&self.source),
            Arc::clone(&self.shared),
            Arc::clone(&callbacks),
            changes,
            refresh_rx,
        ));
        info!("Result store subscribed to '{}'", self.source.name());

        SubscriptionHandle {
            callbacks,
            refresh: RefreshTrigger { tx: refresh_tx },
            task: Some(task),
        }
    }

    /// Release a subscription. No `on_change` runs after this returns.
    pub fn stop(&self, handle: SubscriptionHandle) {
        handle.stop();
        info!("Result store unsubscribed from '{}'", self.source.name());
    }

    /// Last successfully fetched list, newest first.
    pub fn snapshot(&self) -> Vec<ResultItem> {
        self.shared
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.shared
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Manual retry trigger for a running subscription.
#[derive(Debug, Clone)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    /// Ask for a re-fetch. Returns false once the subscription has stopped.
    /// A refresh already queued absorbs this one.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Owns a running subscription. Dropping it stops the subscription too.
pub struct SubscriptionHandle {
    callbacks: Arc<Mutex<Option<Callbacks>>>,
    refresh: RefreshTrigger,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn trigger(&self) -> RefreshTrigger {
        self.refresh.clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Waits for a callback that is mid-flight, then disarms all future ones.
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sync_loop(
    source: Arc<dyn ResultSource>,
    shared: Arc<Shared>,
    callbacks: Arc<Mutex<Option<Callbacks>>>,
    mut changes: broadcast::Receiver<ChangeEvent>,
    mut refresh_rx: mpsc::Receiver<()>,
) {
    sync_once(source.as_ref(), &shared, &callbacks).await;

    let mut changes_open = true;
    loop {
        tokio::select! {
            ev = changes.recv(), if changes_open => match ev {
                Ok(ev) => debug!("Change notification: {:?} {:?}", ev.kind, ev.id),
                Err(RecvError::Lagged(n)) => warn!("Missed {} change notifications, re-syncing", n),
                Err(RecvError::Closed) => {
                    warn!("Change stream from '{}' closed; manual refresh only", source.name());
                    changes_open = false;
                    continue;
                }
            },
            req = refresh_rx.recv() => match req {
                Some(()) => debug!("Manual refresh requested"),
                None => break,
            },
        }

        // Everything queued so far is covered by the fetch below.
        let coalesced = drain_pending(&mut changes, &mut refresh_rx);
        if coalesced > 0 {
            debug!("Coalesced {} queued notifications", coalesced);
        }
        sync_once(source.as_ref(), &shared, &callbacks).await;
    }
    debug!("Sync loop for '{}' finished", source.name());
}

fn drain_pending(
    changes: &mut broadcast::Receiver<ChangeEvent>,
    refresh_rx: &mut mpsc::Receiver<()>,
) -> usize {
    let mut drained = 0;
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => drained += 1,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    while refresh_rx.try_recv().is_ok() {
        drained += 1;
    }
    drained
}

async fn sync_once(
    source: &dyn ResultSource,
    shared: &Shared,
    callbacks: &Mutex<Option<Callbacks>>,
) {
    let result = match tokio::time::timeout(FETCH_TIMEOUT, source.fetch_results()).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(FETCH_TIMEOUT)),
    };
    match result {
        Ok(items) => publish(shared, callbacks, items),
        Err(e) => report(shared, callbacks, &e),
    }
}

fn publish(shared: &Shared, callbacks: &Mutex<Option<Callbacks>>, mut items: Vec<ResultItem>) {
    sort_newest_first(&mut items);

    let guard = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(cb) = guard.as_ref() else {
        debug!("Subscription stopped; discarding fetched results");
        return;
    };

    *shared.snapshot.write().unwrap_or_else(PoisonError::into_inner) = items.clone();
    {
        let mut status = shared.status.write().unwrap_or_else(PoisonError::into_inner);
        status.last_synced_at = Some(Utc::now());
        status.last_error = None;
        status.fetch_count += 1;
        status.result_count = items.len();
    }
    debug!("Synced {} results", items.len());
    (cb.on_change)(items);
}

fn report(shared: &Shared, callbacks: &Mutex<Option<Callbacks>>, err: &FetchError) {
    let guard = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(cb) = guard.as_ref() else {
        return;
    };

    error!("Result fetch failed, keeping last known results: {}", err);
    {
        let mut status = shared.status.write().unwrap_or_else(PoisonError::into_inner);
        status.last_error = Some(err.to_string());
        status.fetch_count += 1;
    }
    (cb.on_error)(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ChangeKind, Placement};
    use crate::live::source::CHANGE_CHANNEL_CAPACITY;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::timeout;

    /// Scripted source: serves `results`, optionally fails or blocks on demand.
    struct ScriptedSource {
        results: Mutex<Vec<ResultItem>>,
        changes: broadcast::Sender<ChangeEvent>,
        fetch_calls: AtomicUsize,
        fail_next: AtomicBool,
        block: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl ScriptedSource {
        fn new(results: Vec<ResultItem>) -> Arc<Self> {
            let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
            Arc::new(ScriptedSource {
                results: Mutex::new(results),
                changes,
                fetch_calls: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                block: AtomicBool::new(false),
                entered: Notify::new(),
                release: Notify::new(),
            })
        }

        fn set_results(&self, results: Vec<ResultItem>) {
            *self.results.lock().unwrap() = results;
        }

        fn notify(&self) {
            self.changes
                .send(ChangeEvent {
                    kind: ChangeKind::Insert,
                    id: None,
                })
                .unwrap();
        }

        fn calls(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResultSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_results(&self) -> Result<Vec<ResultItem>, FetchError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.block.load(Ordering::SeqCst) {
                let released = self.release.notified();
                self.entered.notify_one();
                released.await;
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(FetchError::Database("connection reset".into()));
            }
            Ok(self.results.lock().unwrap().clone())
        }

        fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
            self.changes.subscribe()
        }
    }

    fn result(competition: &str, hour: u32) -> ResultItem {
        ResultItem {
            id: Some(format!("{}-{}", competition, hour)),
            category: "Junior".into(),
            competition: competition.into(),
            gender: Some("Boys".into()),
            first_place: Placement::new("Ali", "Yaqooth"),
            second_place: Placement::new("Sam", "Marjaan"),
            announced_at: Some(Utc.with_ymd_and_hms(2025, 9, 5, hour, 0, 0).unwrap()),
        }
    }

    type Seen = Arc<Mutex<Vec<Vec<ResultItem>>>>;

    /// Start a subscription that records every on_change / on_error.
    fn start_recording(
        store: &ResultStore,
    ) -> (
        SubscriptionHandle,
        Seen,
        mpsc::UnboundedReceiver<()>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let seen_clone = Arc::clone(&seen);
        let handle = store.start(
            move |items| {
                seen_clone.lock().unwrap().push(items);
                let _ = change_tx.send(());
            },
            move |err| {
                let _ = error_tx.send(err.to_string());
            },
        );
        (handle, seen, change_rx, error_rx)
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("callback should fire")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_start_delivers_initial_list_newest_first() {
        let source = ScriptedSource::new(vec![result("Essay", 9), result("Speech", 11)]);
        let store = ResultStore::new(source.clone());
        let (handle, seen, mut changes, _errors) = start_recording(&store);

        next(&mut changes).await;
        let first = seen.lock().unwrap()[0].clone();
        assert_eq!(first[0].competition, "Speech");
        assert_eq!(first[1].competition, "Essay");
        assert_eq!(store.snapshot(), first);
        assert_eq!(source.calls(), 1);

        store.stop(handle);
    }

    #[tokio::test]
    async fn test_change_triggers_one_refetch_and_one_on_change() {
        let source = ScriptedSource::new(vec![result("Essay", 9)]);
        let store = ResultStore::new(source.clone());
        let (handle, seen, mut changes, _errors) = start_recording(&store);
        next(&mut changes).await;

        source.set_results(vec![result("Essay", 9), result("Quiz", 10)]);
        source.notify();
        next(&mut changes).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].len(), 2);
        assert_eq!(seen[1][0].competition, "Quiz");

        drop(seen);
        store.stop(handle);
    }

    #[tokio::test]
    async fn test_stop_suppresses_in_flight_fetch() {
        let source = ScriptedSource::new(vec![result("Essay", 9)]);
        let store = ResultStore::new(source.clone());
        let (handle, seen, mut changes, _errors) = start_recording(&store);
        next(&mut changes).await;

        source.block.store(true, Ordering::SeqCst);
        source.set_results(vec![result("Essay", 9), result("Quiz", 10)]);
        source.notify();
        timeout(Duration::from_secs(2), source.entered.notified())
            .await
            .expect("refetch should start");

        store.stop(handle);
        source.release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_last_known_results() {
        let source = ScriptedSource::new(vec![result("Essay", 9)]);
        let store = ResultStore::new(source.clone());
        let (handle, seen, mut changes, mut errors) = start_recording(&store);
        next(&mut changes).await;

        source.fail_next.store(true, Ordering::SeqCst);
        source.set_results(vec![]);
        source.notify();
        let err = next(&mut errors).await;
        assert!(err.contains("connection reset"));
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(store.status().last_error.is_some());

        // Subscription survives the failure
        source.set_results(vec![result("Essay", 9), result("Quiz", 10)]);
        source.notify();
        next(&mut changes).await;
        assert_eq!(store.snapshot().len(), 2);
        assert!(store.status().last_error.is_none());

        store.stop(handle);
    }

    #[tokio::test]
    async fn test_initial_fetch_failure_reports_without_on_change() {
        let source = ScriptedSource::new(vec![result("Essay", 9)]);
        source.fail_next.store(true, Ordering::SeqCst);
        let store = ResultStore::new(source.clone());
        let (handle, seen, _changes, mut errors) = start_recording(&store);

        next(&mut errors).await;
        assert!(seen.lock().unwrap().is_empty());
        assert!(store.snapshot().is_empty());

        store.stop(handle);
    }

    #[tokio::test]
    async fn test_manual_refresh_retries() {
        let source = ScriptedSource::new(vec![result("Essay", 9)]);
        source.fail_next.store(true, Ordering::SeqCst);
        let store = ResultStore::new(source.clone());
        let (handle, _seen, mut changes, mut errors) = start_recording(&store);
        next(&mut errors).await;

        assert!(handle.trigger().request());
        next(&mut changes).await;
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.status().fetch_count, 2);

        let trigger = handle.trigger();
        store.stop(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!trigger.request());
    }

    #[tokio::test]
    async fn test_notifications_during_fetch_are_coalesced() {
        let source = ScriptedSource::new(vec![result("Essay", 9)]);
        let store = ResultStore::new(source.clone());
        let (handle, seen, mut changes, _errors) = start_recording(&store);
        next(&mut changes).await;

        source.block.store(true, Ordering::SeqCst);
        source.notify();
        timeout(Duration::from_secs(2), source.entered.notified())
            .await
            .expect("refetch should start");

        // Three more changes land while the fetch is stuck
        source.block.store(false, Ordering::SeqCst);
        source.set_results(vec![result("Essay", 9), result("Quiz", 10)]);
        source.notify();
        source.notify();
        source.notify();
        source.release.notify_waiters();

        next(&mut changes).await;
        next(&mut changes).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(source.calls(), 3);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().unwrap().len(), 2);
        drop(seen);

        store.stop(handle);
    }
}
