//! Visibility sources.
//!
//! A [`VisibilitySource`] watches the registered anchors and reports
//! threshold crossings to the driver as [`ObserverSignal`]s. Two sources
//! ship with the crate:
//!
//! - [`PushSource`]: the host forwards native viewport callbacks through a
//!   [`PushFeed`]
//! - [`PollingSource`]: measures layout on an interval through a
//!   [`LayoutProbe`] and derives crossings itself

mod polling;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::anchor::AnchorId;
use crate::error::{Error, Result};
use crate::visibility::{Clock, LayoutSnapshot, VisibilityEvent};

pub use polling::{LayoutProbe, PollingSource, SharedLayout};

/// A message from a visibility source to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverSignal {
    /// An anchor crossed a visibility threshold.
    Visibility(VisibilityEvent),
    /// The document layout was measured.
    Layout(LayoutSnapshot),
}

/// Trait for viewport observation backends.
///
/// Implementors watch the anchors passed to [`observe`](Self::observe) and
/// send signals through the channel given to [`start`](Self::start).
pub trait VisibilitySource: Send {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Start watching the given anchors.
    fn observe(&mut self, ids: &[AnchorId]);

    /// Stop watching the given anchors.
    fn unobserve(&mut self, ids: &[AnchorId]);

    /// Start the source.
    ///
    /// Must be called from within a tokio runtime. Signal timestamps are
    /// taken from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObserverUnavailable`] if the source cannot
    /// initialize, or [`Error::ObserverAlreadyRunning`] if it was started
    /// before.
    fn start(&mut self, tx: mpsc::Sender<ObserverSignal>, clock: Clock) -> Result<()>;

    /// Stop the source.
    fn stop(&mut self);

    /// Check if the source is currently running.
    fn is_running(&self) -> bool;
}

/// The set of anchors a source is watching, shared with its task.
#[derive(Debug)]
struct ObservedSet {
    ids: watch::Sender<BTreeSet<AnchorId>>,
}

impl ObservedSet {
    fn new() -> Self {
        let (ids, _) = watch::channel(BTreeSet::new());
        Self { ids }
    }

    fn insert(&self, ids: &[AnchorId]) {
        self.ids.send_modify(|set| set.extend(ids.iter().cloned()));
    }

    fn remove(&self, ids: &[AnchorId]) {
        self.ids.send_modify(|set| {
            for id in ids {
                set.remove(id);
            }
        });
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.borrow().contains(id)
    }

    fn len(&self) -> usize {
        self.ids.borrow().len()
    }

    fn subscribe(&self) -> watch::Receiver<BTreeSet<AnchorId>> {
        self.ids.subscribe()
    }
}

/// A report queued by the host before it is stamped and forwarded.
#[derive(Debug)]
enum Report {
    Visibility {
        anchor_id: AnchorId,
        is_visible: bool,
        intersection_ratio: f64,
    },
    Layout(LayoutSnapshot),
}

/// Host-side handle of a [`PushSource`].
///
/// Cheap to clone. Reports made before the source starts are queued.
#[derive(Debug, Clone)]
pub struct PushFeed {
    tx: mpsc::UnboundedSender<Report>,
}

impl PushFeed {
    /// Report a threshold crossing for an anchor.
    ///
    /// Returns `false` once the source has shut down.
    pub fn report(&self, anchor_id: impl Into<AnchorId>, is_visible: bool, intersection_ratio: f64) -> bool {
        self.tx
            .send(Report::Visibility {
                anchor_id: anchor_id.into(),
                is_visible,
                intersection_ratio,
            })
            .is_ok()
    }

    /// Report a fresh layout measurement.
    ///
    /// Returns `false` once the source has shut down.
    pub fn report_layout(&self, layout: LayoutSnapshot) -> bool {
        self.tx.send(Report::Layout(layout)).is_ok()
    }
}

/// Visibility source fed by the host's native viewport observer.
///
/// Reports for anchors that are not currently observed are dropped.
#[derive(Debug)]
pub struct PushSource {
    feed: Option<mpsc::UnboundedReceiver<Report>>,
    observed: ObservedSet,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PushSource {
    const NAME: &'static str = "push";

    /// Create a source and the feed that drives it.
    #[must_use]
    pub fn new() -> (Self, PushFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            feed: Some(rx),
            observed: ObservedSet::new(),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        };
        (source, PushFeed { tx })
    }

    /// Whether `id` is currently observed.
    #[must_use]
    pub fn is_observing(&self, id: &str) -> bool {
        self.observed.contains(id)
    }

    /// Number of observed anchors.
    #[must_use]
    pub fn observed_len(&self) -> usize {
        self.observed.len()
    }
}

impl VisibilitySource for PushSource {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observe(&mut self, ids: &[AnchorId]) {
        self.observed.insert(ids);
    }

    fn unobserve(&mut self, ids: &[AnchorId]) {
        self.observed.remove(ids);
    }

    fn start(&mut self, tx: mpsc::Sender<ObserverSignal>, clock: Clock) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::ObserverAlreadyRunning { name: Self::NAME });
        }
        let mut feed = self
            .feed
            .take()
            .ok_or_else(|| Error::observer_unavailable(Self::NAME, "feed already consumed"))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let observed = self.observed.subscribe();
        debug!("Starting push visibility source");

        self.task = Some(tokio::spawn(async move {
            while let Some(report) = feed.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let signal = match report {
                    Report::Visibility {
                        anchor_id,
                        is_visible,
                        intersection_ratio,
                    } => {
                        let known = observed.borrow().contains(&anchor_id);
                        if !known {
                            trace!(anchor = %anchor_id, "Dropping report for unobserved anchor");
                            continue;
                        }
                        ObserverSignal::Visibility(VisibilityEvent::new(
                            anchor_id,
                            is_visible,
                            intersection_ratio,
                            clock.now_ms(),
                        ))
                    }
                    Report::Layout(layout) => ObserverSignal::Layout(layout),
                };
                if tx.send(signal).await.is_err() {
                    debug!("Signal channel closed, stopping push source");
                    break;
                }
            }
            running.store(false, Ordering::SeqCst);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!("Push visibility source stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PushSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<AnchorId> {
        raw.iter().map(|id| AnchorId::from(*id)).collect()
    }

    #[test]
    fn test_observe_and_unobserve() {
        let (mut source, _feed) = PushSource::new();
        source.observe(&ids(&["a", "b", "c"]));
        source.unobserve(&ids(&["b"]));

        assert!(source.is_observing("a"));
        assert!(!source.is_observing("b"));
        assert_eq!(source.observed_len(), 2);
        assert_eq!(source.name(), "push");
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_source_forwards_observed_reports() {
        let (mut source, feed) = PushSource::new();
        source.observe(&ids(&["a"]));
        let (tx, mut rx) = mpsc::channel(8);
        let clock = Clock::start();

        assert!(feed.report("zzz", true, 1.0));
        assert!(feed.report("a", true, 0.5));
        assert!(feed.report_layout(LayoutSnapshot::new(800.0, 0.0, 1600.0)));

        source.start(tx, clock).unwrap();
        assert!(source.is_running());

        match rx.recv().await.unwrap() {
            ObserverSignal::Visibility(event) => {
                assert_eq!(event.anchor_id.as_str(), "a");
                assert!((event.intersection_ratio - 0.5).abs() < f64::EPSILON);
            }
            other => panic!("unexpected signal: {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), ObserverSignal::Layout(_)));

        source.stop();
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn test_push_source_cannot_start_twice() {
        let (mut source, _feed) = PushSource::new();
        let (tx, _rx) = mpsc::channel(8);
        source.start(tx.clone(), Clock::start()).unwrap();

        let err = source.start(tx.clone(), Clock::start()).unwrap_err();
        assert!(err.is_observer_error());

        source.stop();
        let err = source.start(tx, Clock::start()).unwrap_err();
        assert!(matches!(err, Error::ObserverUnavailable { .. }));
    }

    #[test]
    fn test_feed_reports_fail_after_source_dropped() {
        let (source, feed) = PushSource::new();
        drop(source);
        assert!(!feed.report("a", true, 1.0));
    }
}
