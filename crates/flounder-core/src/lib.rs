#![forbid(unsafe_code)]

//! Event-driven element size-change detection (headless).
//!
//! `flounder-core` turns a layout-engine side effect (achievable scroll ranges
//! collapsing or opening when a watched element's box changes) into a single
//! notification per change, without timer polling. The render surface and the
//! timer facility are injected capabilities, so the engine is runtime-agnostic
//! and fully deterministic under test.
//!
//! Pieces:
//! - [`watcher::SizeWatcher`]: the scroll-sentinel state machine.
//! - [`surface::RenderSurface`] / [`timer::TimerHost`]: the capability seams.
//! - [`headless`]: an in-memory surface and virtual-clock event loop.

pub mod error;
pub mod geom;
pub mod headless;
pub mod style;
pub mod surface;
pub mod timer;
pub mod watcher;

pub use error::{Error, Result};
pub use geom::{Size, size};
pub use style::{FontSpec, Length, StylePatch};
pub use surface::{ElementId, RenderSurface, ScrollListener};
pub use timer::{TimerHost, TimerId};
pub use watcher::{SizeWatcher, SizeWatcherDelegate, WatcherState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
