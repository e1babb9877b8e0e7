//! Polling substitute for a native viewport observer.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use super::{ObservedSet, ObserverSignal, VisibilitySource};
use crate::anchor::AnchorId;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::visibility::{Clock, LayoutSnapshot, Millis, VisibilityEvent};

/// Measures the current document layout.
#[async_trait]
pub trait LayoutProbe: Send + Sync {
    /// Measure viewport, scroll offset and anchor geometry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Layout`] if the layout cannot be read.
    async fn measure(&self) -> Result<LayoutSnapshot>;
}

/// A probe reading a layout the host keeps up to date.
#[derive(Debug, Clone, Default)]
pub struct SharedLayout {
    layout: Arc<Mutex<LayoutSnapshot>>,
}

impl SharedLayout {
    /// Create a probe starting at `layout`.
    #[must_use]
    pub fn new(layout: LayoutSnapshot) -> Self {
        Self {
            layout: Arc::new(Mutex::new(layout)),
        }
    }

    /// Replace the layout returned by the next measurement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Layout`] if the lock is poisoned.
    pub fn set(&self, layout: LayoutSnapshot) -> Result<()> {
        let mut current = self
            .layout
            .lock()
            .map_err(|e| Error::Layout(format!("layout lock poisoned: {e}")))?;
        *current = layout;
        Ok(())
    }
}

#[async_trait]
impl LayoutProbe for SharedLayout {
    async fn measure(&self) -> Result<LayoutSnapshot> {
        self.layout
            .lock()
            .map(|layout| layout.clone())
            .map_err(|e| Error::Layout(format!("layout lock poisoned: {e}")))
    }
}

/// Last reported visibility and threshold bucket per anchor.
#[derive(Debug)]
struct Crossings {
    thresholds: Vec<f64>,
    last: HashMap<AnchorId, (bool, usize)>,
}

impl Crossings {
    fn new(thresholds: Vec<f64>) -> Self {
        Self {
            thresholds,
            last: HashMap::new(),
        }
    }

    fn bucket(&self, ratio: f64) -> usize {
        self.thresholds.iter().filter(|t| ratio >= **t).count()
    }

    /// Events for anchors seen for the first time, or whose visibility
    /// flipped, or whose ratio moved into another threshold bucket.
    fn update(
        &mut self,
        layout: &LayoutSnapshot,
        observed: &BTreeSet<AnchorId>,
        now: Millis,
    ) -> Vec<VisibilityEvent> {
        self.last.retain(|id, _| observed.contains(id));

        let mut events = Vec::new();
        for id in observed {
            let (is_visible, ratio) = layout.geometry(id.as_str()).map_or((false, 0.0), |g| {
                (
                    g.is_on_screen(layout.viewport_height),
                    g.intersection_ratio(layout.viewport_height),
                )
            });
            let state = (is_visible, self.bucket(ratio));
            if self.last.get(id) == Some(&state) {
                continue;
            }
            self.last.insert(id.clone(), state);
            events.push(VisibilityEvent::new(id.clone(), is_visible, ratio, now));
        }
        events
    }
}

/// Visibility source that measures layout on a fixed interval.
pub struct PollingSource {
    probe: Arc<dyn LayoutProbe>,
    poll_interval: Duration,
    thresholds: Vec<f64>,
    observed: ObservedSet,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PollingSource {
    const NAME: &'static str = "polling";

    /// Create a polling source.
    ///
    /// `thresholds` are the intersection ratios at which a change is
    /// reported, in the manner of a native intersection observer.
    #[must_use]
    pub fn new(probe: Arc<dyn LayoutProbe>, poll_interval: Duration, thresholds: Vec<f64>) -> Self {
        Self {
            probe,
            poll_interval,
            thresholds,
            observed: ObservedSet::new(),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Create a polling source with the configured interval and thresholds.
    #[must_use]
    pub fn from_config(probe: Arc<dyn LayoutProbe>, config: &Config) -> Self {
        Self::new(probe, config.poll_interval(), config.observer.thresholds.clone())
    }

    /// Number of observed anchors.
    #[must_use]
    pub fn observed_len(&self) -> usize {
        self.observed.len()
    }
}

impl std::fmt::Debug for PollingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingSource")
            .field("poll_interval", &self.poll_interval)
            .field("thresholds", &self.thresholds)
            .field("observed", &self.observed.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl VisibilitySource for PollingSource {
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
        if self.poll_interval.is_zero() {
            return Err(Error::observer_unavailable(Self::NAME, "poll interval must be non-zero"));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::ObserverAlreadyRunning { name: Self::NAME });
        }

        debug!(
            interval_ms = self.poll_interval.as_millis(),
            "Starting polling visibility source"
        );

        let probe = Arc::clone(&self.probe);
        let running = Arc::clone(&self.running);
        let observed = self.observed.subscribe();
        let mut crossings = Crossings::new(self.thresholds.clone());
        let period = self.poll_interval;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            let mut last_layout: Option<LayoutSnapshot> = None;

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;

                let layout = match probe.measure().await {
                    Ok(layout) => layout,
                    Err(e) => {
                        warn!(error = %e, "Error measuring layout");
                        continue;
                    }
                };
                let ids = observed.borrow().clone();
                let events = crossings.update(&layout, &ids, clock.now_ms());

                let mut signals = Vec::with_capacity(events.len() + 1);
                if last_layout.as_ref() != Some(&layout) {
                    last_layout = Some(layout.clone());
                    signals.push(ObserverSignal::Layout(layout));
                }
                signals.extend(events.into_iter().map(ObserverSignal::Visibility));

                for signal in signals {
                    if tx.send(signal).await.is_err() {
                        debug!("Signal channel closed, stopping polling source");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
            debug!("Polling visibility source stopped");
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

    fn observed(raw: &[&str]) -> BTreeSet<AnchorId> {
        raw.iter().map(|id| AnchorId::from(*id)).collect()
    }

    #[test]
    fn test_first_observation_reports_every_anchor() {
        let mut crossings = Crossings::new(THRESHOLDS.to_vec());
        let layout = LayoutSnapshot::new(800.0, 0.0, 3000.0)
            .with_anchor("a", 0.0, 400.0)
            .with_anchor("b", 900.0, 400.0);

        let events = crossings.update(&layout, &observed(&["a", "b"]), 10);

        assert_eq!(events.len(), 2);
        assert!(events[0].is_visible);
        assert!(!events[1].is_visible);
        assert_eq!(events[0].timestamp, 10);
    }

    #[test]
    fn test_only_crossings_are_reported() {
        let mut crossings = Crossings::new(THRESHOLDS.to_vec());
        let ids = observed(&["a"]);
        crossings.update(&LayoutSnapshot::new(800.0, 0.0, 3000.0).with_anchor("a", 100.0, 400.0), &ids, 0);

        let small_move = LayoutSnapshot::new(800.0, 50.0, 3000.0).with_anchor("a", 50.0, 400.0);
        assert!(crossings.update(&small_move, &ids, 100).is_empty());

        let big_move = LayoutSnapshot::new(800.0, 400.0, 3000.0).with_anchor("a", -300.0, 400.0);
        let events = crossings.update(&big_move, &ids, 200);
        assert_eq!(events.len(), 1);
        assert!((events[0].intersection_ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_unmeasured_anchor_is_hidden() {
        let mut crossings = Crossings::new(THRESHOLDS.to_vec());
        let events = crossings.update(&LayoutSnapshot::new(800.0, 0.0, 800.0), &observed(&["x"]), 0);
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_visible);
    }

    #[test]
    fn test_forgets_unobserved_anchors() {
        let mut crossings = Crossings::new(THRESHOLDS.to_vec());
        let layout = LayoutSnapshot::new(800.0, 0.0, 3000.0).with_anchor("a", 0.0, 400.0);
        crossings.update(&layout, &observed(&["a"]), 0);
        crossings.update(&layout, &observed(&[]), 100);

        assert_eq!(crossings.update(&layout, &observed(&["a"]), 200).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_source_emits_layout_and_events() {
        let probe = SharedLayout::new(
            LayoutSnapshot::new(800.0, 0.0, 2000.0)
                .with_anchor("a", 0.0, 400.0)
                .with_anchor("b", 500.0, 400.0),
        );
        let mut source = PollingSource::new(
            Arc::new(probe.clone()),
            Duration::from_millis(100),
            THRESHOLDS.to_vec(),
        );
        source.observe(&[AnchorId::from("a"), AnchorId::from("b")]);
        let (tx, mut rx) = mpsc::channel(16);
        source.start(tx, Clock::start()).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), ObserverSignal::Layout(_)));
        assert!(matches!(rx.recv().await.unwrap(), ObserverSignal::Visibility(_)));
        assert!(matches!(rx.recv().await.unwrap(), ObserverSignal::Visibility(_)));

        probe
            .set(LayoutSnapshot::new(800.0, 900.0, 2000.0).with_anchor("b", -400.0, 400.0))
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ObserverSignal::Layout(_)));
        let mut hidden = Vec::new();
        for _ in 0..2 {
            if let ObserverSignal::Visibility(event) = rx.recv().await.unwrap() {
                assert!(!event.is_visible);
                hidden.push(event.anchor_id.to_string());
            }
        }
        hidden.sort();
        assert_eq!(hidden, ["a", "b"]);

        source.stop();
        assert!(!source.is_running());
    }

    #[test]
    fn test_from_config_uses_observer_settings() {
        let mut config = Config::default();
        config.observer.poll_interval_ms = 250;
        config.observer.thresholds = vec![0.0, 0.5];

        let source = PollingSource::from_config(Arc::new(SharedLayout::default()), &config);
        assert_eq!(source.poll_interval, Duration::from_millis(250));
        assert_eq!(source.thresholds, [0.0, 0.5]);
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn test_polling_source_rejects_zero_interval() {
        let mut source = PollingSource::new(Arc::new(SharedLayout::default()), Duration::ZERO, THRESHOLDS.to_vec());
        let (tx, _rx) = mpsc::channel(1);
        let err = source.start(tx, Clock::start()).unwrap_err();
        assert!(matches!(err, Error::ObserverUnavailable { .. }));
        assert!(!source.is_running());
    }
}
