//! Scroll-sentinel size watching.
//!
//! A [`SizeWatcher`] observes one element's box dimensions and notifies its
//! delegate the instant they change, without re-measuring on a schedule. The
//! watched element is wrapped in two sentinel structures whose achievable
//! scroll range is exactly one pixel in each axis; any change to the watched
//! box collapses one range to zero, forcing the nudged scroll offset back and
//! making the surface emit a scroll-changed signal.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::geom::Size;
use crate::style::{Length, StylePatch};
use crate::surface::{ElementId, RenderSurface, ScrollListener};

/// Watcher life cycle. Public methods validate the current state and fail with
/// [`Error::InvalidState`] on out-of-order invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Created,
    SentinelsBuilt,
    SentinelsAttached,
    Prepared,
    Watching,
    Disposed,
}

pub trait SizeWatcherDelegate {
    fn size_changed(&self, element: ElementId, new_size: Size);
}

pub struct SizeWatcher {
    surface: Rc<RefCell<dyn RenderSurface>>,
    element: ElementId,
    grow_clip: ElementId,
    grow_content: ElementId,
    shrink_clip: ElementId,
    delegate: Weak<dyn SizeWatcherDelegate>,
    weak: Weak<SizeWatcher>,
    disposable: Cell<bool>,
    size: Cell<Option<Size>>,
    state: Cell<WatcherState>,
}

impl SizeWatcher {
    /// Builds the sentinel structure around `element` and inserts it under
    /// `container`. `container` must be in the document tree before
    /// [`prepare_for_watch`](Self::prepare_for_watch) is called.
    ///
    /// Passing a pre-computed `initial_size` skips measuring the element in
    /// `prepare_for_watch`, saving a layout pass when the caller already knows
    /// the box dimensions.
    pub fn new(
        surface: Rc<RefCell<dyn RenderSurface>>,
        element: ElementId,
        container: ElementId,
        delegate: Weak<dyn SizeWatcherDelegate>,
        initial_size: Option<Size>,
    ) -> Rc<Self> {
        let (grow_content, grow_clip, shrink_clip) = {
            let mut s = surface.borrow_mut();

            let grow_content = s.create_element();
            let grow_clip = s.create_element();
            s.apply_style(
                grow_clip,
                &StylePatch {
                    absolute: Some(true),
                    offset_left: Some(0),
                    offset_top: Some(0),
                    width: Some(Length::Percent(100)),
                    height: Some(Length::Percent(100)),
                    clip_overflow: Some(true),
                    ..Default::default()
                },
            );
            s.append_child(grow_clip, grow_content);

            s.apply_style(
                element,
                &StylePatch {
                    absolute: Some(true),
                    ..Default::default()
                },
            );
            s.append_child(element, grow_clip);

            let shrink_clip = s.create_element();
            s.append_child(shrink_clip, element);

            (grow_content, grow_clip, shrink_clip)
        };

        let watcher = Rc::new_cyclic(|weak| Self {
            surface: Rc::clone(&surface),
            element,
            grow_clip,
            grow_content,
            shrink_clip,
            delegate,
            weak: weak.clone(),
            disposable: Cell::new(true),
            size: Cell::new(None),
            state: Cell::new(WatcherState::Created),
        });

        watcher.state.set(WatcherState::SentinelsBuilt);
        if let Some(size) = initial_size {
            watcher.set_size(size);
        }
        surface.borrow_mut().append_child(container, shrink_clip);
        watcher.state.set(WatcherState::SentinelsAttached);
        watcher
    }

    pub fn watched_element(&self) -> ElementId {
        self.element
    }

    pub fn state(&self) -> WatcherState {
        self.state.get()
    }

    pub fn size(&self) -> Option<Size> {
        self.size.get()
    }

    /// A disposable watcher (the default) reports at most one change and then
    /// permanently stops observing. Non-disposable watchers re-arm themselves
    /// after each report.
    pub fn set_disposable(&self, disposable: bool) {
        self.disposable.set(disposable);
    }

    /// Records the watched box dimensions and resizes both sentinels around
    /// them: the grow content node to one pixel larger, the shrink clip to one
    /// pixel smaller. Not state-gated.
    pub fn set_size(&self, size: Size) {
        self.size.set(Some(size));
        let mut s = self.surface.borrow_mut();
        s.apply_style(
            self.grow_content,
            &StylePatch {
                width: Some(Length::Px(size.width.saturating_add(1))),
                height: Some(Length::Px(size.height.saturating_add(1))),
                ..Default::default()
            },
        );
        s.apply_style(
            self.shrink_clip,
            &StylePatch {
                absolute: Some(true),
                offset_left: Some(0),
                offset_top: Some(0),
                clip_overflow: Some(true),
                width: Some(Length::Px(size.width.saturating_sub(1))),
                height: Some(Length::Px(size.height.saturating_sub(1))),
                ..Default::default()
            },
        );
    }

    /// Measures the element if no size is known yet and nudges both sentinels
    /// to scroll offset (1, 1).
    ///
    /// A reset the surface does not honor is tolerated with a warning, unless
    /// the sentinel subtree has no path to the document root at all, which
    /// fails with [`Error::NotAttached`].
    pub fn prepare_for_watch(&self) -> Result<()> {
        self.expect_state(WatcherState::SentinelsAttached, "prepare_for_watch")?;

        if self.size.get().is_none() {
            let measured = self.surface.borrow_mut().measure(self.element);
            self.set_size(measured);
        }

        {
            let mut s = self.surface.borrow_mut();
            s.set_scroll_offsets(self.shrink_clip, 1, 1);
            s.set_scroll_offsets(self.grow_clip, 1, 1);

            let shrink = s.scroll_offsets(self.shrink_clip);
            let grow = s.scroll_offsets(self.grow_clip);
            if shrink.0 == 0 || shrink.1 == 0 || grow.0 == 0 || grow.1 == 0 {
                if !s.in_document(self.shrink_clip) {
                    return Err(Error::NotAttached);
                }
                tracing::warn!(element = ?self.element, "could not nudge sentinel scroll offsets");
            }
        }

        self.state.set(WatcherState::Prepared);
        Ok(())
    }

    /// Subscribes to scroll-changed signals on both sentinels.
    pub fn begin_watching(&self) -> Result<()> {
        self.expect_state(WatcherState::Prepared, "begin_watching")?;

        let listener: Weak<dyn ScrollListener> = self.weak.clone();
        let mut s = self.surface.borrow_mut();
        s.subscribe_scroll(self.shrink_clip, listener.clone());
        s.subscribe_scroll(self.grow_clip, listener);
        drop(s);

        self.state.set(WatcherState::Watching);
        Ok(())
    }

    pub fn end_watching(&self) -> Result<()> {
        self.expect_state(WatcherState::Watching, "end_watching")?;

        let mut s = self.surface.borrow_mut();
        s.unsubscribe_scroll(self.shrink_clip);
        s.unsubscribe_scroll(self.grow_clip);
        drop(s);

        self.state.set(WatcherState::Prepared);
        Ok(())
    }

    fn expect_state(&self, expected: WatcherState, method: &'static str) -> Result<()> {
        let actual = self.state.get();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                method,
                expected,
                actual,
            })
        }
    }
}

impl ScrollListener for SizeWatcher {
    fn scroll_changed(&self, _sentinel: ElementId) {
        // Signals can arrive after disposal: the unsubscribe may race with a
        // signal already in flight.
        if self.state.get() == WatcherState::Disposed {
            return;
        }

        let new_size = self.surface.borrow_mut().measure(self.element);

        // A signal with an unchanged box happens when one axis grows while the
        // other shrinks in the same layout pass (both sentinels fire), and as
        // an echo of the offset nudge in prepare_for_watch.
        if self.size.get() == Some(new_size) {
            return;
        }

        if let Some(delegate) = self.delegate.upgrade() {
            delegate.size_changed(self.element, new_size);
        }

        if self.disposable.get() {
            if let Err(err) = self.end_watching() {
                tracing::warn!(error = %err, "failed to unsubscribe a disposing watcher");
            }
            self.state.set(WatcherState::Disposed);
        } else {
            // Re-arm: record the new size, reset the sentinels, and go back to
            // watching. The scroll subscriptions are still in place, so
            // begin_watching is not required again.
            self.set_size(new_size);
            self.state.set(WatcherState::SentinelsAttached);
            if let Err(err) = self.prepare_for_watch() {
                tracing::warn!(error = %err, "failed to re-arm size watcher");
                return;
            }
            self.state.set(WatcherState::Watching);
        }
    }
}
