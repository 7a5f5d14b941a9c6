use std::rc::Weak;

use crate::geom::Size;
use crate::style::StylePatch;

/// Opaque handle to an element owned by a [`RenderSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(u32);

impl ElementId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Receiver for scroll-position-changed signals. Listeners are registered by
/// [`Weak`] reference; a listener that has been dropped is silently skipped.
pub trait ScrollListener {
    fn scroll_changed(&self, element: ElementId);
}

/// The rendering/layout capability the detection engine consumes.
///
/// Implementations deliver scroll-changed signals one at a time, each handler
/// running to completion before the next is processed. Signals are delivered
/// asynchronously with respect to the mutation that caused them, so a handler
/// never observes the surface mid-update.
pub trait RenderSurface {
    fn create_element(&mut self) -> ElementId;

    fn set_text(&mut self, element: ElementId, text: &str);

    fn apply_style(&mut self, element: ElementId, patch: &StylePatch);

    /// Inserts `child` under `parent`, detaching it from any previous parent.
    fn append_child(&mut self, parent: ElementId, child: ElementId);

    /// Removes `element` from its parent. The detached subtree stays intact.
    fn detach(&mut self, element: ElementId);

    /// Current rendered box dimensions. Elements without a path to the
    /// document root measure zero.
    fn measure(&mut self, element: ElementId) -> Size;

    /// Requests a scroll position; the surface clamps it to the achievable
    /// range. A programmatic scroll that actually moves the position emits a
    /// scroll-changed signal, like a user scroll would.
    fn set_scroll_offsets(&mut self, element: ElementId, x: u32, y: u32);

    fn scroll_offsets(&mut self, element: ElementId) -> (u32, u32);

    /// Whether `element` has a path to the document root.
    fn in_document(&self, element: ElementId) -> bool;

    /// The document root; top-level containers are appended under it.
    fn root(&self) -> ElementId;

    /// Capability probe: `false` means scroll-changed signals cannot be relied
    /// on for layout-change detection and callers should poll instead.
    fn scroll_events_reliable(&self) -> bool;

    fn subscribe_scroll(&mut self, element: ElementId, listener: Weak<dyn ScrollListener>);

    fn unsubscribe_scroll(&mut self, element: ElementId);
}
