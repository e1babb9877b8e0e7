//! `sectionwatch` - Active-section tracking for long scrolling documents
//!
//! This library decides, without flicker, which single section of a long
//! document is "active" for navigation highlighting, breadcrumbs and
//! progress display. Visibility reports are debounced into snapshots, a pure
//! resolver picks one anchor from each snapshot, and programmatic scrolls
//! suppress resolution until they land.
//!
//! The core ([`SectionTracker`]) runs on an explicit millisecond timeline so
//! it can be driven deterministically; [`TrackerDriver`] runs it on tokio.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod aggregator;
pub mod anchor;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod logging;
pub mod navigation;
pub mod observer;
pub mod registry;
pub mod replay;
pub mod resolver;
pub mod route;
mod subscription;
pub mod tracker;
pub mod visibility;

pub use anchor::{AnchorId, AnchorRecord};
pub use config::Config;
pub use coordinator::{NavigationIntent, NavigationOrigin, ScrollBehavior, Scroller};
pub use driver::{TrackerDriver, TrackerHandle};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use navigation::ProgressMode;
pub use observer::{ObserverSignal, VisibilitySource};
pub use registry::AnchorRegistry;
pub use resolver::{ActiveState, ResolveReason};
pub use subscription::Subscription;
pub use tracker::{SectionTracker, TrackerSettings};
pub use visibility::{LayoutSnapshot, Millis, VisibilityEvent};
