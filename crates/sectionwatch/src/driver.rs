//! Async driver for a [`SectionTracker`].
//!
//! The driver is the single execution queue of the engine: one task that
//! waits on host commands, visibility signals and the tracker's next timer,
//! and handles whichever is ready first. Because everything funnels through
//! this loop, the tracker itself needs no locking.
//!
//! The tracker's subscriptions are not `Send`, so the driver future is not
//! either. Run it on the current task (`driver.run().await`, `tokio::join!`
//! or a `LocalSet`), and talk to it from anywhere through the cloneable
//! [`TrackerHandle`].

use std::future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::anchor::{AnchorId, AnchorRecord};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::observer::{ObserverSignal, VisibilitySource};
use crate::registry::RegistryDiff;
use crate::resolver::ActiveState;
use crate::route::{apply_route_command, Fragment, HierarchyProvider, MemoryLocation, RouteSync};
use crate::tracker::{SectionTracker, TrackerSettings};
use crate::visibility::{Clock, Millis};

/// A request from the host to the driver.
#[derive(Debug)]
enum Command {
    RegisterAnchors {
        ids: Vec<AnchorId>,
        hierarchy: Vec<AnchorRecord>,
        reply: oneshot::Sender<RegistryDiff>,
    },
    NavigateTo {
        anchor_id: AnchorId,
        reply: oneshot::Sender<Result<()>>,
    },
    FragmentChanged {
        fragment: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Cloneable, `Send` handle to a running [`TrackerDriver`].
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<Arc<ActiveState>>,
}

impl TrackerHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::DriverClosed)
    }

    /// Replace the tracked anchors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverClosed`] if the driver has stopped.
    pub async fn register_anchors(
        &self,
        ids: Vec<AnchorId>,
        hierarchy: Vec<AnchorRecord>,
    ) -> Result<RegistryDiff> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterAnchors {
            ids,
            hierarchy,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::DriverClosed)
    }

    /// Jump to an anchor on behalf of the user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingAnchor`] if the anchor is not registered, or
    /// [`Error::DriverClosed`] if the driver has stopped.
    pub async fn navigate_to(&self, anchor_id: impl Into<AnchorId>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::NavigateTo {
            anchor_id: anchor_id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::DriverClosed)?
    }

    /// Report an external change of the location fragment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFragment`] for an unparsable fragment,
    /// [`Error::MissingAnchor`] for an unknown target, or
    /// [`Error::DriverClosed`] if the driver has stopped.
    pub async fn fragment_changed(&self, fragment: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FragmentChanged {
            fragment: fragment.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::DriverClosed)?
    }

    /// Ask the driver to stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverClosed`] if the driver has already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// The latest published active state.
    #[must_use]
    pub fn active_state(&self) -> Arc<ActiveState> {
        Arc::clone(&self.state.borrow())
    }

    /// Wait for the active state to change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverClosed`] if the driver stops first.
    pub async fn changed(&mut self) -> Result<Arc<ActiveState>> {
        self.state.changed().await.map_err(|_| Error::DriverClosed)?;
        Ok(Arc::clone(&self.state.borrow_and_update()))
    }
}

/// What woke the driver loop.
enum Wake {
    Command(Option<Command>),
    Signal(Option<ObserverSignal>),
    Deadline,
}

/// Runs a [`SectionTracker`] against a visibility source.
pub struct TrackerDriver {
    tracker: SectionTracker,
    source: Box<dyn VisibilitySource>,
    route: Option<RouteSync>,
    provider: Option<Box<dyn HierarchyProvider>>,
    clock: Clock,
    commands: mpsc::Receiver<Command>,
    signal_capacity: usize,
    state: watch::Sender<Arc<ActiveState>>,
}

impl TrackerDriver {
    /// Create a driver and its handle.
    ///
    /// `capacity` bounds both the command and the signal channel.
    #[must_use]
    pub fn new(
        tracker: SectionTracker,
        source: Box<dyn VisibilitySource>,
        capacity: usize,
    ) -> (Self, TrackerHandle) {
        let capacity = capacity.max(1);
        let (commands_tx, commands) = mpsc::channel(capacity);
        let (state, state_rx) = watch::channel(tracker.active_state());
        let driver = Self {
            tracker,
            source,
            route: None,
            provider: None,
            clock: Clock::start(),
            commands,
            signal_capacity: capacity,
            state,
        };
        let handle = TrackerHandle {
            commands: commands_tx,
            state: state_rx,
        };
        (driver, handle)
    }

    /// Create a driver from configuration.
    ///
    /// The tracker takes its windows from `config` and the channels its
    /// capacity. With `route.sync_fragment` set, the active section is
    /// mirrored into an in-memory location.
    #[must_use]
    pub fn from_config(config: &Config, source: Box<dyn VisibilitySource>) -> (Self, TrackerHandle) {
        let tracker = SectionTracker::new(TrackerSettings::from(config));
        let (driver, handle) = Self::new(tracker, source, config.observer.channel_capacity);
        if config.route.sync_fragment {
            return (driver.with_route(RouteSync::new(Box::new(MemoryLocation::new()))), handle);
        }
        (driver, handle)
    }

    /// Mirror the top-level active anchor into a location fragment.
    #[must_use]
    pub fn with_route(mut self, route: RouteSync) -> Self {
        self.route = Some(route);
        self
    }

    /// Load sections named by fragments from `provider`.
    #[must_use]
    pub fn with_hierarchy_provider(mut self, provider: Box<dyn HierarchyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// The driven tracker, e.g. to subscribe before running.
    #[must_use]
    pub fn tracker(&self) -> &SectionTracker {
        &self.tracker
    }

    /// Run until shut down or every handle is dropped.
    ///
    /// # Errors
    ///
    /// Currently never fails; a visibility source that cannot start puts
    /// the tracker into registry-order mode instead.
    pub async fn run(mut self) -> Result<()> {
        let (signal_tx, mut signals) = mpsc::channel(self.signal_capacity);
        if let Err(e) = self.source.start(signal_tx, self.clock) {
            warn!(source = self.source.name(), error = %e, "Failed to start visibility source");
            self.tracker.mark_observer_unavailable();
        }
        let mut signals_open = true;
        info!(source = self.source.name(), "Tracker driver started");

        loop {
            let wake = {
                let deadline = self.tracker.next_deadline();
                let clock = self.clock;
                let timer = async move {
                    match deadline {
                        Some(at) => sleep_until(clock.instant_at(at)).await,
                        None => future::pending().await,
                    }
                };
                tokio::select! {
                    biased;
                    command = self.commands.recv() => Wake::Command(command),
                    signal = signals.recv(), if signals_open => Wake::Signal(signal),
                    () = timer => Wake::Deadline,
                }
            };

            match wake {
                Wake::Command(None | Some(Command::Shutdown)) => break,
                Wake::Command(Some(command)) => self.handle_command(command),
                Wake::Signal(Some(signal)) => self.handle_signal(signal),
                Wake::Signal(None) => {
                    debug!("Visibility source closed its channel");
                    signals_open = false;
                }
                Wake::Deadline => self.tracker.advance(self.clock.now_ms()),
            }
            self.publish();
        }

        self.source.stop();
        info!("Tracker driver stopped");
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        let now = self.clock.now_ms();
        match command {
            Command::RegisterAnchors {
                ids,
                hierarchy,
                reply,
            } => {
                let diff = self.tracker.register_anchors(ids, hierarchy, now);
                self.apply_diff(&diff);
                let _ = reply.send(diff);
            }
            Command::NavigateTo { anchor_id, reply } => {
                let result = self.tracker.navigate_to(anchor_id.as_str(), now);
                let _ = reply.send(result);
            }
            Command::FragmentChanged { fragment, reply } => {
                let result = self.fragment_changed(&fragment, now);
                if let Err(e) = &result {
                    warn!(fragment = %fragment, error = %e, "Ignoring fragment change");
                }
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    fn fragment_changed(&mut self, raw: &str, now: Millis) -> Result<()> {
        let fragment = Fragment::parse(raw)?;
        let Some(route) = self.route.as_mut() else {
            debug!(%fragment, "No route synchronizer, ignoring fragment change");
            return Ok(());
        };
        let Some(command) = route.on_fragment_changed(&fragment, &self.tracker) else {
            return Ok(());
        };
        if let Some(diff) = apply_route_command(command, &mut self.tracker, self.provider.as_deref(), now)? {
            self.apply_diff(&diff);
        }
        Ok(())
    }

    fn apply_diff(&mut self, diff: &RegistryDiff) {
        self.source.unobserve(&diff.removed);
        self.source.observe(&diff.added);
    }

    fn handle_signal(&mut self, signal: ObserverSignal) {
        match signal {
            ObserverSignal::Visibility(event) => {
                let now = self.clock.now_ms();
                self.tracker.handle_event(event, now);
            }
            ObserverSignal::Layout(layout) => self.tracker.update_layout(layout),
        }
    }

    fn publish(&mut self) {
        let current = self.tracker.active_state();
        self.state.send_if_modified(|published| {
            if Arc::ptr_eq(published, &current) {
                return false;
            }
            *published = Arc::clone(&current);
            true
        });
        if let Some(route) = self.route.as_mut() {
            route.sync_from_state(&self.tracker);
        }
    }
}

impl std::fmt::Debug for TrackerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerDriver")
            .field("tracker", &self.tracker)
            .field("source", &self.source.name())
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}
