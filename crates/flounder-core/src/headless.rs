//! Deterministic in-memory host: a virtual-clock event loop and a render
//! surface with a factor-based text metrics model.
//!
//! The surface emulates the one layout behavior the detection engine depends
//! on: clipped elements clamp their scroll offsets to `content - box`, and a
//! clamp that moves the offset emits a scroll-changed signal. Everything is
//! driven explicitly ([`HeadlessLoop::run_until_idle`] delivers pending
//! signals, [`HeadlessLoop::advance`] elapses virtual time), so tests can
//! simulate font arrival and timer expiry without a real rendering surface.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::geom::Size;
use crate::style::{FontSpec, Length, StylePatch};
use crate::surface::{ElementId, RenderSurface, ScrollListener};
use crate::timer::{TimerHost, TimerId};

/// Font size used when an element carries text but no [`FontSpec`].
pub const DEFAULT_FONT_SIZE_PX: u32 = 16;

/// Deterministic per-family text metrics: advance width and line height as
/// factors of the font size. Text measures
/// `round(chars × size × advance_factor)` wide and
/// `round(lines × size × line_height_factor)` tall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceMetrics {
    pub advance_factor: f64,
    pub line_height_factor: f64,
}

impl FaceMetrics {
    fn measure(&self, text: &str, size_px: u32, nowrap: bool) -> Size {
        // nowrap collapses line breaks into the single line, like
        // white-space: nowrap does.
        let lines: Vec<usize> = if nowrap {
            vec![text.chars().filter(|c| *c != '\n').count()]
        } else {
            text.split('\n').map(|l| l.chars().count()).collect()
        };
        let max_chars = lines.iter().copied().max().unwrap_or(0);
        let width = (max_chars as f64 * size_px as f64 * self.advance_factor).round() as u32;
        let height = (lines.len() as f64 * size_px as f64 * self.line_height_factor).round() as u32;
        Size::new(width, height)
    }
}

enum TimerCallback {
    OneShot(Box<dyn FnOnce()>),
    Repeating(Box<dyn FnMut()>),
}

struct TimerEntry {
    id: TimerId,
    due_ms: u64,
    period_ms: Option<u64>,
    seq: u64,
    callback: TimerCallback,
}

/// Single-threaded virtual-clock event loop: an immediate task queue plus
/// one-shot and repeating timers. Implements [`TimerHost`].
pub struct HeadlessLoop {
    now_ms: Cell<u64>,
    queue: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    timers: RefCell<Vec<TimerEntry>>,
    counter: Cell<u64>,
    cancelled: RefCell<Vec<TimerId>>,
}

impl HeadlessLoop {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            now_ms: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            counter: Cell::new(0),
            cancelled: RefCell::new(Vec::new()),
        })
    }

    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.get())
    }

    /// Enqueues a task to run on the next drain.
    pub fn post(&self, task: Box<dyn FnOnce()>) {
        self.queue.borrow_mut().push_back(task);
    }

    /// Runs queued tasks (and any tasks they enqueue) until the queue is
    /// empty. Does not elapse virtual time.
    pub fn run_until_idle(&self) {
        loop {
            let task = self.queue.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Elapses virtual time by `delta`, firing due timers in chronological
    /// order and draining the task queue between firings.
    pub fn advance(&self, delta: Duration) {
        let target = self.now_ms.get() + delta.as_millis() as u64;
        self.run_until_idle();
        loop {
            let next = {
                let timers = self.timers.borrow();
                timers
                    .iter()
                    .filter(|t| t.due_ms <= target)
                    .min_by_key(|t| (t.due_ms, t.seq))
                    .map(|t| t.id)
            };
            let Some(id) = next else { break };
            let entry = {
                let mut timers = self.timers.borrow_mut();
                let Some(index) = timers.iter().position(|t| t.id == id) else {
                    break;
                };
                timers.remove(index)
            };
            self.now_ms.set(self.now_ms.get().max(entry.due_ms));
            match entry.callback {
                TimerCallback::OneShot(callback) => callback(),
                TimerCallback::Repeating(mut callback) => {
                    callback();
                    if !self.take_cancelled(entry.id) {
                        let period = entry.period_ms.unwrap_or(1).max(1);
                        self.timers.borrow_mut().push(TimerEntry {
                            id: entry.id,
                            due_ms: entry.due_ms + period,
                            period_ms: entry.period_ms,
                            seq: self.next_counter(),
                            callback: TimerCallback::Repeating(callback),
                        });
                    }
                }
            }
            self.run_until_idle();
        }
        self.now_ms.set(target);
    }

    fn next_counter(&self) -> u64 {
        let next = self.counter.get() + 1;
        self.counter.set(next);
        next
    }

    fn take_cancelled(&self, id: TimerId) -> bool {
        let mut cancelled = self.cancelled.borrow_mut();
        if let Some(index) = cancelled.iter().position(|c| *c == id) {
            cancelled.remove(index);
            true
        } else {
            false
        }
    }

    fn remove_timer(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        if let Some(index) = timers.iter().position(|t| t.id == id) {
            timers.remove(index);
            true
        } else {
            false
        }
    }
}

impl TimerHost for HeadlessLoop {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let id = TimerId::new(self.next_counter());
        self.timers.borrow_mut().push(TimerEntry {
            id,
            due_ms: self.now_ms.get() + delay.as_millis() as u64,
            period_ms: None,
            seq: self.next_counter(),
            callback: TimerCallback::OneShot(callback),
        });
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        self.remove_timer(id);
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId {
        let id = TimerId::new(self.next_counter());
        let period_ms = (period.as_millis() as u64).max(1);
        self.timers.borrow_mut().push(TimerEntry {
            id,
            due_ms: self.now_ms.get() + period_ms,
            period_ms: Some(period_ms),
            seq: self.next_counter(),
            callback: TimerCallback::Repeating(callback),
        });
        id
    }

    fn clear_interval(&self, id: TimerId) {
        // The entry is absent while its own callback runs; remember the id so
        // the firing loop drops it instead of rescheduling.
        if !self.remove_timer(id) {
            let mut cancelled = self.cancelled.borrow_mut();
            if !cancelled.contains(&id) {
                cancelled.push(id);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NodeStyle {
    absolute: bool,
    left: i32,
    top: i32,
    width: Option<Length>,
    height: Option<Length>,
    clip: bool,
    font: Option<FontSpec>,
    nowrap: bool,
    hidden: bool,
}

struct Node {
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    text: Option<String>,
    style: NodeStyle,
    scroll: (u32, u32),
    listener: Option<Weak<dyn ScrollListener>>,
    size: Size,
}

impl Node {
    fn new() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            text: None,
            style: NodeStyle::default(),
            scroll: (0, 0),
            listener: None,
            size: Size::zero(),
        }
    }
}

struct Face {
    metrics: FaceMetrics,
    active: bool,
}

/// In-memory render surface with deterministic layout.
///
/// Font stacks resolve to the first *active* family; the generic families
/// (serif, sans-serif, cursive, monospace) are pre-registered active with
/// mutually distinct metrics. [`register_face`](Self::register_face) declares
/// a family whose font has not arrived yet; [`activate_face`](Self::activate_face)
/// models the download completing, triggering a reflow and whatever signals it
/// causes. Text is never wrapped to a width; the nowrap style only collapses
/// explicit line breaks.
pub struct HeadlessSurface {
    event_loop: Rc<HeadlessLoop>,
    weak: Weak<RefCell<HeadlessSurface>>,
    nodes: Vec<Node>,
    root: ElementId,
    faces: IndexMap<String, Face>,
    fallback: FaceMetrics,
    scroll_events: bool,
}

impl HeadlessSurface {
    pub fn new(event_loop: Rc<HeadlessLoop>) -> Rc<RefCell<Self>> {
        let generics = [
            ("serif", 0.50, 1.16),
            ("sans-serif", 0.54, 1.18),
            ("cursive", 0.62, 1.34),
            ("monospace", 0.60, 1.20),
        ];
        let mut faces = IndexMap::new();
        for (family, advance_factor, line_height_factor) in generics {
            faces.insert(
                family.to_string(),
                Face {
                    metrics: FaceMetrics {
                        advance_factor,
                        line_height_factor,
                    },
                    active: true,
                },
            );
        }
        let fallback = faces["serif"].metrics;

        Rc::new_cyclic(|weak| {
            RefCell::new(Self {
                event_loop,
                weak: weak.clone(),
                nodes: vec![Node::new()],
                root: ElementId::new(0),
                faces,
                fallback,
                scroll_events: true,
            })
        })
    }

    /// Declares a font family whose metrics are known but whose font has not
    /// arrived. Re-registering a family resets it to inactive.
    pub fn register_face(&mut self, family: impl Into<String>, metrics: FaceMetrics) {
        self.faces.insert(
            family.into(),
            Face {
                metrics,
                active: false,
            },
        );
        self.reflow();
    }

    /// Marks a registered family as arrived, so font stacks resolve to it.
    pub fn activate_face(&mut self, family: &str) {
        match self.faces.get_mut(family) {
            Some(face) => face.active = true,
            None => {
                tracing::warn!(family, "activate_face: unknown family");
                return;
            }
        }
        self.reflow();
    }

    /// Degrades the surface: scroll-changed signals are no longer emitted and
    /// `scroll_events_reliable` reports `false`.
    pub fn set_scroll_events_supported(&mut self, supported: bool) {
        self.scroll_events = supported;
    }

    pub fn element_count(&self) -> usize {
        self.nodes.len()
    }

    /// Inline offsets, for asserting offscreen placement in tests.
    pub fn offset_of(&self, element: ElementId) -> (i32, i32) {
        let style = &self.node(element).style;
        (style.left, style.top)
    }

    pub fn children_of(&self, element: ElementId) -> Vec<ElementId> {
        self.node(element).children.clone()
    }

    pub fn is_hidden(&self, element: ElementId) -> bool {
        self.node(element).style.hidden
    }

    fn node(&self, element: ElementId) -> &Node {
        &self.nodes[element.raw() as usize]
    }

    fn node_mut(&mut self, element: ElementId) -> &mut Node {
        &mut self.nodes[element.raw() as usize]
    }

    fn resolve_metrics(&self, font: Option<&FontSpec>) -> (FaceMetrics, u32) {
        let size_px = font.map_or(DEFAULT_FONT_SIZE_PX, |f| f.size_px);
        let metrics = font
            .and_then(|f| {
                f.families.iter().find_map(|family| {
                    self.faces
                        .get(family)
                        .filter(|face| face.active)
                        .map(|face| face.metrics)
                })
            })
            .unwrap_or(self.fallback);
        (metrics, size_px)
    }

    fn measure_text(&self, text: &str, style: &NodeStyle) -> Size {
        let (metrics, size_px) = self.resolve_metrics(style.font.as_ref());
        metrics.measure(text, size_px, style.nowrap)
    }

    fn layout_node(
        &self,
        element: ElementId,
        containing: Size,
        sizes: &mut [Size],
        visited: &mut [bool],
    ) -> Size {
        let index = element.raw() as usize;
        visited[index] = true;
        let node = &self.nodes[index];

        let explicit_width = node.style.width.map(|l| resolve_length(l, containing.width));
        let explicit_height = node
            .style
            .height
            .map(|l| resolve_length(l, containing.height));
        let text_size = node
            .text
            .as_deref()
            .map(|text| self.measure_text(text, &node.style));

        // Percent children resolve against this box; for auto-sized containers
        // the text size (if any) stands in before children are known.
        let provisional = Size::new(
            explicit_width
                .or(text_size.map(|s| s.width))
                .unwrap_or(containing.width),
            explicit_height
                .or(text_size.map(|s| s.height))
                .unwrap_or(containing.height),
        );

        let mut content = Size::zero();
        for &child in &node.children {
            let child_size = self.layout_node(child, provisional, sizes, visited);
            if !self.nodes[child.raw() as usize].style.absolute {
                content.width = content.width.max(child_size.width);
                content.height = content.height.max(child_size.height);
            }
        }

        let auto = text_size.unwrap_or(content);
        let size = Size::new(
            explicit_width.unwrap_or(auto.width),
            explicit_height.unwrap_or(auto.height),
        );
        sizes[index] = size;
        size
    }

    fn max_scroll(&self, element: ElementId) -> (u32, u32) {
        let node = self.node(element);
        if !node.style.clip || !self.in_document(element) {
            return (0, 0);
        }
        let mut content = Size::zero();
        for &child in &node.children {
            let child_size = self.node(child).size;
            content.width = content.width.max(child_size.width);
            content.height = content.height.max(child_size.height);
        }
        (
            content.width.saturating_sub(node.size.width),
            content.height.saturating_sub(node.size.height),
        )
    }

    /// Recomputes layout for the attached tree, zeroes detached subtrees,
    /// re-clamps clipped scroll offsets, and queues a scroll-changed signal
    /// for every offset the clamp moved.
    fn reflow(&mut self) {
        let count = self.nodes.len();
        let mut sizes = vec![Size::zero(); count];
        let mut visited = vec![false; count];
        self.layout_node(self.root, Size::zero(), &mut sizes, &mut visited);
        for index in 0..count {
            self.nodes[index].size = if visited[index] {
                sizes[index]
            } else {
                Size::zero()
            };
        }

        let mut moved = Vec::new();
        for index in 0..count {
            let element = ElementId::new(index as u32);
            let max = self.max_scroll(element);
            let node = &mut self.nodes[index];
            let clamped = (node.scroll.0.min(max.0), node.scroll.1.min(max.1));
            if clamped != node.scroll {
                node.scroll = clamped;
                moved.push(element);
            }
        }
        for element in moved {
            self.queue_scroll_signal(element);
        }
    }

    /// Signals are posted as loop tasks and the listener is looked up at
    /// delivery time, so a subscription made after the mutation still observes
    /// a signal that was already in flight.
    fn queue_scroll_signal(&self, element: ElementId) {
        if !self.scroll_events {
            return;
        }
        let weak = self.weak.clone();
        self.event_loop.post(Box::new(move || {
            let Some(surface) = weak.upgrade() else { return };
            let listener = surface.borrow().node(element).listener.clone();
            if let Some(listener) = listener.and_then(|l| l.upgrade()) {
                listener.scroll_changed(element);
            }
        }));
    }
}

fn resolve_length(length: Length, basis: u32) -> u32 {
    match length {
        Length::Px(px) => px,
        Length::Percent(percent) => ((basis as u64 * percent as u64) / 100) as u32,
    }
}

impl RenderSurface for HeadlessSurface {
    fn create_element(&mut self) -> ElementId {
        let id = ElementId::new(self.nodes.len() as u32);
        self.nodes.push(Node::new());
        id
    }

    fn set_text(&mut self, element: ElementId, text: &str) {
        self.node_mut(element).text = Some(text.to_string());
        self.reflow();
    }

    fn apply_style(&mut self, element: ElementId, patch: &StylePatch) {
        {
            let style = &mut self.node_mut(element).style;
            if let Some(absolute) = patch.absolute {
                style.absolute = absolute;
            }
            if let Some(left) = patch.offset_left {
                style.left = left;
            }
            if let Some(top) = patch.offset_top {
                style.top = top;
            }
            if let Some(width) = patch.width {
                style.width = Some(width);
            }
            if let Some(height) = patch.height {
                style.height = Some(height);
            }
            if let Some(clip) = patch.clip_overflow {
                style.clip = clip;
            }
            if let Some(font) = &patch.font {
                style.font = Some(font.clone());
            }
            if let Some(nowrap) = patch.nowrap {
                style.nowrap = nowrap;
            }
            if let Some(hidden) = patch.hidden {
                style.hidden = hidden;
            }
        }
        self.reflow();
    }

    fn append_child(&mut self, parent: ElementId, child: ElementId) {
        if let Some(previous) = self.node(child).parent {
            let siblings = &mut self.node_mut(previous).children;
            siblings.retain(|c| *c != child);
        }
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
        self.reflow();
    }

    fn detach(&mut self, element: ElementId) {
        let Some(parent) = self.node(element).parent else {
            return;
        };
        self.node_mut(parent).children.retain(|c| *c != element);
        self.node_mut(element).parent = None;
        self.reflow();
    }

    fn measure(&mut self, element: ElementId) -> Size {
        self.node(element).size
    }

    fn set_scroll_offsets(&mut self, element: ElementId, x: u32, y: u32) {
        let max = self.max_scroll(element);
        let requested = (x.min(max.0), y.min(max.1));
        let moved = {
            let node = self.node_mut(element);
            if requested != node.scroll {
                node.scroll = requested;
                true
            } else {
                false
            }
        };
        if moved {
            self.queue_scroll_signal(element);
        }
    }

    fn scroll_offsets(&mut self, element: ElementId) -> (u32, u32) {
        self.node(element).scroll
    }

    fn in_document(&self, element: ElementId) -> bool {
        let mut current = element;
        loop {
            if current == self.root {
                return true;
            }
            match self.node(current).parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn root(&self) -> ElementId {
        self.root
    }

    fn scroll_events_reliable(&self) -> bool {
        self.scroll_events
    }

    fn subscribe_scroll(&mut self, element: ElementId, listener: Weak<dyn ScrollListener>) {
        self.node_mut(element).listener = Some(listener);
    }

    fn unsubscribe_scroll(&mut self, element: ElementId) {
        self.node_mut(element).listener = None;
    }
}
