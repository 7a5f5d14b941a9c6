//! Reference baseline metrics.
//!
//! Every probe is compared against the measured size of a fixed glyph-dense
//! sample rendered in a fallback-only family. Two baseline families with
//! maximally distinct metrics are used by default, so a requested font whose
//! metrics coincide with one baseline is still caught by the other.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use flounder_core::geom::Size;
use flounder_core::style::{FontSpec, StylePatch};
use flounder_core::surface::RenderSurface;

/// Glyph-dense ASCII run measured for every baseline and probe. Dense enough
/// that two fonts with different metrics are very unlikely to produce the
/// same box.
pub const SAMPLE_TEXT: &str = " !\"\\#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[]^_`abcdefghijklmnopqrstuvwxyz{|}~";

/// Samples render large so the smallest metric difference is still a whole
/// pixel after rounding.
pub const SAMPLE_FONT_SIZE_PX: u32 = 50;

pub const DEFAULT_BASELINE_FAMILIES: [&str; 2] = ["serif", "cursive"];

/// Lazily measured BaselineFamily → [`Size`] map.
///
/// Measured at most once per cache instance and reused by every run that was
/// handed the cache; [`reset`](Self::reset) exists for test isolation. The
/// per-thread default instance is available through [`shared`](Self::shared).
pub struct BaselineCache {
    families: Vec<String>,
    sizes: RefCell<Option<IndexMap<String, Size>>>,
}

thread_local! {
    static SHARED: Rc<BaselineCache> = Rc::new(BaselineCache::new());
}

impl BaselineCache {
    pub fn new() -> Self {
        Self::with_families(DEFAULT_BASELINE_FAMILIES.iter().map(|f| f.to_string()))
    }

    pub fn with_families(families: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            families: families.into_iter().map(Into::into).collect(),
            sizes: RefCell::new(None),
        }
    }

    /// The per-thread shared instance used by loaders that were not handed an
    /// explicit cache.
    pub fn shared() -> Rc<BaselineCache> {
        SHARED.with(Rc::clone)
    }

    pub fn families(&self) -> &[String] {
        &self.families
    }

    /// Drops the measured sizes; the next [`sizes`](Self::sizes) call
    /// re-measures.
    pub fn reset(&self) {
        *self.sizes.borrow_mut() = None;
    }

    /// Baseline sizes in [`families`](Self::families) order, measuring them on
    /// `surface` on first use.
    pub fn sizes(&self, surface: &Rc<RefCell<dyn RenderSurface>>) -> Vec<Size> {
        if let Some(measured) = self.sizes.borrow().as_ref() {
            return measured.values().copied().collect();
        }
        let measured = Self::measure(surface, &self.families);
        let out = measured.values().copied().collect();
        *self.sizes.borrow_mut() = Some(measured);
        out
    }

    fn measure(
        surface: &Rc<RefCell<dyn RenderSurface>>,
        families: &[String],
    ) -> IndexMap<String, Size> {
        let mut s = surface.borrow_mut();

        let container = s.create_element();
        s.apply_style(container, &offscreen_container_style());
        let sample = s.create_element();
        s.set_text(sample, SAMPLE_TEXT);
        s.apply_style(
            sample,
            &StylePatch {
                nowrap: Some(true),
                ..Default::default()
            },
        );
        s.append_child(container, sample);
        let root = s.root();
        s.append_child(root, container);

        let mut sizes = IndexMap::new();
        for family in families {
            s.apply_style(
                sample,
                &StylePatch {
                    font: Some(FontSpec::new([family.as_str()], SAMPLE_FONT_SIZE_PX)),
                    ..Default::default()
                },
            );
            sizes.insert(family.clone(), s.measure(sample));
        }

        s.detach(container);
        sizes
    }
}

impl Default for BaselineCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Styling for the probe container: parked far offscreen and invisible, so
/// probes never flash inside the client's viewport.
pub(crate) fn offscreen_container_style() -> StylePatch {
    StylePatch {
        absolute: Some(true),
        offset_left: Some(-10_000),
        offset_top: Some(-10_000),
        nowrap: Some(true),
        hidden: Some(true),
        ..Default::default()
    }
}
