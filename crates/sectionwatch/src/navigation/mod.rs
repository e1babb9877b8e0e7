//! Read-only views derived from the active state.
//!
//! - **Table of contents**: flat, ordered entries with active and
//!   near-active flags.
//! - **Breadcrumb**: title path from the top-level section to the active
//!   anchor.
//! - **Progress**: a 0–100 value from either the scroll ratio or the active
//!   anchor's registry position.
//!
//! None of these hold state of their own; each is recomputed from the same
//! [`ActiveState`](crate::resolver::ActiveState).

mod breadcrumb;
mod progress;
mod toc;

pub use breadcrumb::{breadcrumb, Crumb};
pub use progress::{progress, ProgressMode};
pub use toc::{table_of_contents, TocEntry};
