#![forbid(unsafe_code)]

//! `flounder` waits until requested font families are actually rendered.
//!
//! Fonts declared on a surface (by stylesheet, URL or embedded data) download
//! and activate at an unobservable point in time; the only visible side effect
//! is a probe element's box changing dimensions when the fallback font is
//! swapped out. [`FontLoader`] turns that side effect into per-family and
//! aggregate completion callbacks: each requested family is rendered next to a
//! small set of baseline families with known metrics, and the first measured
//! divergence from a baseline marks the family active. A deadline turns
//! missing fonts into a structured [`NotLoadedError`] instead of a hang.
//!
//! Detection is event-driven where the surface supports it (scroll-sentinel
//! watchers, no polling) and falls back to a fixed-interval poll elsewhere.
//! The rendering surface and timers are injected capabilities; the
//! [`headless`] host makes runs fully deterministic for tests.
//!
//! ```
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use flounder::baseline::BaselineCache;
//! use flounder::headless::{FaceMetrics, HeadlessLoop, HeadlessSurface};
//! use flounder::{FontLoader, LoaderDelegate};
//!
//! let event_loop = HeadlessLoop::new();
//! let surface = HeadlessSurface::new(Rc::clone(&event_loop));
//! surface.borrow_mut().register_face(
//!     "Amstelvar",
//!     FaceMetrics { advance_factor: 0.58, line_height_factor: 1.22 },
//! );
//!
//! let delegate = LoaderDelegate::new().on_fonts_loaded(|error| assert!(error.is_none()));
//! let loader = Rc::new(
//!     FontLoader::new(surface.clone(), event_loop.clone(), ["Amstelvar"], delegate)
//!         .with_timeout(Duration::from_millis(3000))
//!         .with_baseline_cache(Rc::new(BaselineCache::new())),
//! );
//! loader.load_fonts();
//!
//! // The font "arrives"; the probes diverge and the run completes.
//! surface.borrow_mut().activate_face("Amstelvar");
//! event_loop.run_until_idle();
//! ```

pub use flounder_core::*;

pub mod baseline;
pub mod loader;

pub use baseline::{BaselineCache, DEFAULT_BASELINE_FAMILIES, SAMPLE_FONT_SIZE_PX, SAMPLE_TEXT};
pub use loader::{FontLoader, LoaderDelegate, NotLoadedError};
