//! Font load orchestration.
//!
//! One [`FontLoader`] run fans a probe out for every requested family ×
//! baseline family pair, watches each probe for divergence from its baseline
//! size, aggregates first-divergence-per-family into completion callbacks,
//! and enforces an optional deadline.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use flounder_core::geom::Size;
use flounder_core::style::{FontSpec, StylePatch};
use flounder_core::surface::{ElementId, RenderSurface};
use flounder_core::timer::{TimerHost, TimerId};
use flounder_core::watcher::{SizeWatcher, SizeWatcherDelegate};

use crate::baseline::{BaselineCache, SAMPLE_FONT_SIZE_PX, SAMPLE_TEXT, offscreen_container_style};

/// Terminal payload for a run that hit its deadline with fonts still pending.
/// Not an exceptional outcome: the caller decides what, if anything, becomes
/// user-visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct NotLoadedError {
    pub message: String,
    pub not_loaded_font_families: Vec<String>,
}

/// Completion handlers, each optional; an absent handler is silently skipped.
#[derive(Clone, Default)]
pub struct LoaderDelegate {
    pub font_loaded: Option<Rc<dyn Fn(&str)>>,
    pub fonts_loaded: Option<Rc<dyn Fn(Option<NotLoadedError>)>>,
}

impl LoaderDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called at most once per requested family, the moment it is first
    /// detected active.
    pub fn on_font_loaded(mut self, handler: impl Fn(&str) + 'static) -> Self {
        self.font_loaded = Some(Rc::new(handler));
        self
    }

    /// Called exactly once per run, terminally: `None` on full success,
    /// [`NotLoadedError`] when the deadline elapsed first.
    pub fn on_fonts_loaded(mut self, handler: impl Fn(Option<NotLoadedError>) + 'static) -> Self {
        self.fonts_loaded = Some(Rc::new(handler));
        self
    }
}

/// How divergence is observed, chosen once per run by the surface capability
/// probe; the two paths are never mixed within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectionStrategy {
    /// Scroll-sentinel watchers; no polling.
    ScrollSignals,
    /// Fixed-interval re-measurement for surfaces without reliable
    /// scroll-changed signals.
    Polling,
}

impl DetectionStrategy {
    fn select(surface: &Rc<RefCell<dyn RenderSurface>>) -> Self {
        if surface.borrow().scroll_events_reliable() {
            Self::ScrollSignals
        } else {
            Self::Polling
        }
    }
}

struct Probe {
    family: String,
    baseline_family: String,
    reference_size: Size,
}

#[derive(Default)]
struct Run {
    finished: bool,
    container: Option<ElementId>,
    pending: IndexSet<String>,
    probes: IndexMap<ElementId, Probe>,
    watchers: Vec<Rc<SizeWatcher>>,
    deadline_timer: Option<TimerId>,
    poll_timer: Option<TimerId>,
    // Keeps the loader alive for the duration of the run even when the caller
    // drops its handle right after load_fonts; cleared by finish.
    keepalive: Option<Rc<FontLoader>>,
}

pub struct FontLoader {
    surface: Rc<RefCell<dyn RenderSurface>>,
    timers: Rc<dyn TimerHost>,
    baseline: Rc<BaselineCache>,
    families: Vec<String>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    delegate: LoaderDelegate,
    run: RefCell<Run>,
}

impl FontLoader {
    /// The requested list is copied and deduplicated order-preservingly:
    /// exactly one pending state exists per distinct family.
    pub fn new(
        surface: Rc<RefCell<dyn RenderSurface>>,
        timers: Rc<dyn TimerHost>,
        font_families: impl IntoIterator<Item = impl Into<String>>,
        delegate: LoaderDelegate,
    ) -> Self {
        let mut families = IndexSet::new();
        for family in font_families {
            families.insert(family.into());
        }
        Self {
            surface,
            timers,
            baseline: BaselineCache::shared(),
            families: families.into_iter().collect(),
            timeout: None,
            poll_interval: Duration::from_millis(50),
            delegate,
            run: RefCell::new(Run::default()),
        }
    }

    /// Deadline after which still-pending families are reported through
    /// [`NotLoadedError`]. Without a timeout a run with a font that never
    /// arrives simply never completes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_baseline_cache(mut self, cache: Rc<BaselineCache>) -> Self {
        self.baseline = cache;
        self
    }

    /// Re-measurement period for the degraded polling path.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn font_families(&self) -> &[String] {
        &self.families
    }

    /// Starts the detection run. Never blocks: completion is signaled through
    /// the delegate, from a scroll-signal or timer callback.
    pub fn load_fonts(self: Rc<Self>) {
        if self.families.is_empty() {
            self.finish();
            return;
        }

        self.run.borrow_mut().keepalive = Some(Rc::clone(&self));

        if let Some(timeout) = self.timeout {
            let loader = Rc::clone(&self);
            let id = self
                .timers
                .set_timeout(timeout, Box::new(move || loader.finish()));
            self.run.borrow_mut().deadline_timer = Some(id);
        }

        let reference_sizes = self.baseline.sizes(&self.surface);
        let baseline_families = self.baseline.families().to_vec();
        let strategy = DetectionStrategy::select(&self.surface);

        let container = {
            let mut s = self.surface.borrow_mut();
            let container = s.create_element();
            s.apply_style(container, &offscreen_container_style());
            container
        };
        {
            let mut run = self.run.borrow_mut();
            run.container = Some(container);
            run.pending.extend(self.families.iter().cloned());
        }

        for family in &self.families {
            for (index, baseline_family) in baseline_families.iter().enumerate() {
                // The event path starts each probe on the baseline alone; the
                // real stack is applied only once its watcher is armed. The
                // polling path has no arming step, so the full stack goes on
                // immediately.
                let stack: Vec<String> = match strategy {
                    DetectionStrategy::ScrollSignals => vec![baseline_family.clone()],
                    DetectionStrategy::Polling => {
                        vec![family.clone(), baseline_family.clone()]
                    }
                };
                let probe = {
                    let mut s = self.surface.borrow_mut();
                    let probe = s.create_element();
                    s.set_text(probe, SAMPLE_TEXT);
                    s.apply_style(
                        probe,
                        &StylePatch {
                            nowrap: Some(true),
                            font: Some(FontSpec {
                                families: stack,
                                size_px: SAMPLE_FONT_SIZE_PX,
                            }),
                            ..Default::default()
                        },
                    );
                    probe
                };
                self.run.borrow_mut().probes.insert(
                    probe,
                    Probe {
                        family: family.clone(),
                        baseline_family: baseline_family.clone(),
                        reference_size: reference_sizes[index],
                    },
                );
                match strategy {
                    DetectionStrategy::ScrollSignals => {
                        let this: Rc<FontLoader> = Rc::clone(&self);
                        let delegate_rc: Rc<dyn SizeWatcherDelegate> = this;
                        let delegate: Weak<dyn SizeWatcherDelegate> = Rc::downgrade(&delegate_rc);
                        let watcher = SizeWatcher::new(
                            Rc::clone(&self.surface),
                            probe,
                            container,
                            delegate,
                            Some(reference_sizes[index]),
                        );
                        self.run.borrow_mut().watchers.push(watcher);
                    }
                    DetectionStrategy::Polling => {
                        self.surface.borrow_mut().append_child(container, probe);
                    }
                }
            }
        }

        // One insertion for the whole batch: the container enters the document
        // only after every probe is in place.
        {
            let mut s = self.surface.borrow_mut();
            let root = s.root();
            s.append_child(root, container);
        }

        match strategy {
            DetectionStrategy::ScrollSignals => self.activate_watchers(),
            DetectionStrategy::Polling => Self::activate_polling(&self),
        }
    }

    /// Batched activation: every watcher is prepared, then every watcher is
    /// armed and handed the real font stack. Two layout passes for the whole
    /// run instead of one per probe.
    fn activate_watchers(&self) {
        let watchers = self.run.borrow().watchers.clone();
        for watcher in &watchers {
            if let Err(err) = watcher.prepare_for_watch() {
                tracing::warn!(error = %err, "failed to prepare size watcher");
            }
        }
        for watcher in &watchers {
            if let Err(err) = watcher.begin_watching() {
                tracing::warn!(error = %err, "failed to arm size watcher");
                continue;
            }
            let probe = watcher.watched_element();
            let font = {
                let run = self.run.borrow();
                run.probes.get(&probe).map(|p| FontSpec {
                    families: vec![p.family.clone(), p.baseline_family.clone()],
                    size_px: SAMPLE_FONT_SIZE_PX,
                })
            };
            if let Some(font) = font {
                self.surface.borrow_mut().apply_style(
                    probe,
                    &StylePatch {
                        font: Some(font),
                        ..Default::default()
                    },
                );
            }
        }
    }

    fn activate_polling(self_rc: &Rc<Self>) {
        // First check runs synchronously: fonts already active complete
        // without waiting a full poll period.
        self_rc.check_sizes();
        if self_rc.run.borrow().finished {
            return;
        }
        let loader = Rc::clone(self_rc);
        let id = self_rc.timers.set_interval(
            self_rc.poll_interval,
            Box::new(move || loader.check_sizes()),
        );
        self_rc.run.borrow_mut().poll_timer = Some(id);
    }

    fn check_sizes(&self) {
        let divergent: Vec<ElementId> = {
            let run = self.run.borrow();
            if run.finished {
                return;
            }
            let mut s = self.surface.borrow_mut();
            run.probes
                .iter()
                .filter(|(element, probe)| s.measure(**element) != probe.reference_size)
                .map(|(element, _)| *element)
                .collect()
        };
        for element in divergent {
            self.element_size_changed(element);
        }
    }

    fn element_size_changed(&self, element: ElementId) {
        let family = {
            let mut run = self.run.borrow_mut();
            let Some(probe) = run.probes.shift_remove(&element) else {
                return;
            };
            probe.family
        };
        self.surface.borrow_mut().detach(element);

        {
            let mut run = self.run.borrow_mut();
            if run.finished {
                return;
            }
            // First divergence wins: a second baseline diverging for the same
            // family is silently ignored.
            if !run.pending.shift_remove(family.as_str()) {
                return;
            }
        }

        tracing::debug!(family = %family, "font family active");
        if let Some(font_loaded) = self.delegate.font_loaded.clone() {
            font_loaded(&family);
        }

        let all_loaded = self.run.borrow().pending.is_empty();
        if all_loaded {
            self.finish();
        }
    }

    /// Idempotent: the first caller (all-loaded, deadline, or the empty-input
    /// shortcut) tears the run down and delivers the terminal callback; any
    /// later caller is a no-op.
    fn finish(&self) {
        let (container, deadline, poll, watchers, keepalive, not_loaded) = {
            let mut run = self.run.borrow_mut();
            if run.finished {
                return;
            }
            run.finished = true;
            run.probes.clear();
            (
                run.container.take(),
                run.deadline_timer.take(),
                run.poll_timer.take(),
                std::mem::take(&mut run.watchers),
                run.keepalive.take(),
                run.pending.iter().cloned().collect::<Vec<_>>(),
            )
        };

        // Dropping the watcher handles expires their listener registrations;
        // signals still in flight find nothing to deliver to.
        drop(watchers);
        drop(keepalive);

        if let Some(container) = container {
            self.surface.borrow_mut().detach(container);
        }
        if let Some(id) = deadline {
            self.timers.clear_timeout(id);
        }
        if let Some(id) = poll {
            self.timers.clear_interval(id);
        }

        let error = if not_loaded.is_empty() {
            None
        } else {
            Some(NotLoadedError {
                message: "Not all fonts are loaded".to_string(),
                not_loaded_font_families: not_loaded,
            })
        };
        tracing::debug!(
            not_loaded = error.as_ref().map_or(0, |e| e.not_loaded_font_families.len()),
            "font load run finished"
        );

        if let Some(fonts_loaded) = self.delegate.fonts_loaded.clone() {
            fonts_loaded(error);
        }
    }
}

impl SizeWatcherDelegate for FontLoader {
    fn size_changed(&self, element: ElementId, _new_size: Size) {
        self.element_size_changed(element);
    }
}
