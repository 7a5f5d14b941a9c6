use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use flounder::baseline::BaselineCache;
use flounder::headless::{FaceMetrics, HeadlessLoop, HeadlessSurface};
use flounder::surface::RenderSurface;
use flounder::{FontLoader, LoaderDelegate, NotLoadedError};

type Host = (Rc<HeadlessLoop>, Rc<RefCell<HeadlessSurface>>);

fn host() -> Host {
    let event_loop = HeadlessLoop::new();
    let surface = HeadlessSurface::new(Rc::clone(&event_loop));
    (event_loop, surface)
}

fn wide_face() -> FaceMetrics {
    FaceMetrics {
        advance_factor: 0.7,
        line_height_factor: 1.4,
    }
}

type Loaded = Rc<RefCell<Vec<String>>>;
type Finished = Rc<RefCell<Vec<Option<NotLoadedError>>>>;

fn recording_delegate() -> (LoaderDelegate, Loaded, Finished) {
    let loaded: Loaded = Rc::new(RefCell::new(Vec::new()));
    let finished: Finished = Rc::new(RefCell::new(Vec::new()));
    let delegate = LoaderDelegate::new()
        .on_font_loaded({
            let loaded = Rc::clone(&loaded);
            move |family| loaded.borrow_mut().push(family.to_string())
        })
        .on_fonts_loaded({
            let finished = Rc::clone(&finished);
            move |error| finished.borrow_mut().push(error)
        });
    (delegate, loaded, finished)
}

fn loader(
    host: &Host,
    families: &[&str],
    delegate: LoaderDelegate,
    timeout: Option<Duration>,
) -> Rc<FontLoader> {
    let (event_loop, surface) = host;
    let mut loader = FontLoader::new(
        surface.clone(),
        event_loop.clone(),
        families.iter().copied(),
        delegate,
    )
    .with_baseline_cache(Rc::new(BaselineCache::new()));
    if let Some(timeout) = timeout {
        loader = loader.with_timeout(timeout);
    }
    Rc::new(loader)
}

#[test]
fn empty_input_finishes_immediately_without_probes() {
    let host = host();
    let before = host.1.borrow().element_count();
    let (delegate, loaded, finished) = recording_delegate();

    loader(&host, &[], delegate, None).load_fonts();

    assert_eq!(*finished.borrow(), vec![None]);
    assert!(loaded.borrow().is_empty());
    assert_eq!(host.1.borrow().element_count(), before);
}

#[test]
fn timeout_reports_every_pending_family_exactly_once() {
    let (event_loop, surface) = host();
    let loaded: Loaded = Rc::new(RefCell::new(Vec::new()));
    let finished: Finished = Rc::new(RefCell::new(Vec::new()));
    let finished_at: Rc<RefCell<Vec<Duration>>> = Rc::new(RefCell::new(Vec::new()));
    let delegate = LoaderDelegate::new()
        .on_font_loaded({
            let loaded = Rc::clone(&loaded);
            move |family| loaded.borrow_mut().push(family.to_string())
        })
        .on_fonts_loaded({
            let finished = Rc::clone(&finished);
            let finished_at = Rc::clone(&finished_at);
            let lp = Rc::clone(&event_loop);
            move |error| {
                finished_at.borrow_mut().push(lp.now());
                finished.borrow_mut().push(error);
            }
        });

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["NeverA", "NeverB"],
        delegate,
        Some(Duration::from_millis(3000)),
    );
    loader.load_fonts();

    event_loop.run_until_idle();
    assert!(finished.borrow().is_empty());
    assert!(loaded.borrow().is_empty());

    event_loop.advance(Duration::from_millis(3000));

    assert!(loaded.borrow().is_empty());
    let finished = finished.borrow();
    assert_eq!(finished.len(), 1);
    match &finished[0] {
        Some(error) => {
            assert_eq!(error.message, "Not all fonts are loaded");
            assert_eq!(error.not_loaded_font_families, ["NeverA", "NeverB"]);
        }
        None => panic!("expected a NotLoadedError payload"),
    }
    assert_eq!(*finished_at.borrow(), [Duration::from_millis(3000)]);
}

#[test]
fn all_families_load_in_divergence_order_then_one_terminal_callback() {
    let (event_loop, surface) = host();
    surface.borrow_mut().register_face("Alpha", wide_face());
    surface.borrow_mut().register_face(
        "Beta",
        FaceMetrics {
            advance_factor: 0.8,
            line_height_factor: 1.5,
        },
    );

    let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let delegate = LoaderDelegate::new()
        .on_font_loaded({
            let events = Rc::clone(&events);
            move |family| events.borrow_mut().push(format!("font:{family}"))
        })
        .on_fonts_loaded({
            let events = Rc::clone(&events);
            move |error| {
                events.borrow_mut().push(match error {
                    None => "done:ok".to_string(),
                    Some(error) => format!("done:{}", error.not_loaded_font_families.join(",")),
                })
            }
        });

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Alpha", "Beta"],
        delegate,
        Some(Duration::from_millis(10_000)),
    );
    loader.load_fonts();
    event_loop.run_until_idle();

    // Beta arrives first: completion order follows divergence, not request
    // order.
    surface.borrow_mut().activate_face("Beta");
    event_loop.run_until_idle();
    surface.borrow_mut().activate_face("Alpha");
    event_loop.run_until_idle();

    assert_eq!(*events.borrow(), ["font:Beta", "font:Alpha", "done:ok"]);

    // The deadline later is a no-op.
    event_loop.advance(Duration::from_millis(10_000));
    assert_eq!(events.borrow().len(), 3);
}

#[test]
fn first_divergence_wins_across_baselines() {
    let (event_loop, surface) = host();
    surface.borrow_mut().register_face("Gamma", wide_face());
    let (delegate, loaded, finished) = recording_delegate();

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Gamma", "Other"],
        delegate,
        Some(Duration::from_millis(5000)),
    );
    loader.load_fonts();
    event_loop.run_until_idle();

    // Both of Gamma's baseline probes diverge in the same pass; only the
    // first may report.
    surface.borrow_mut().activate_face("Gamma");
    event_loop.run_until_idle();
    assert_eq!(*loaded.borrow(), ["Gamma"]);
    assert!(finished.borrow().is_empty());

    event_loop.advance(Duration::from_millis(5000));
    assert_eq!(*loaded.borrow(), ["Gamma"]);
    let finished = finished.borrow();
    assert_eq!(finished.len(), 1);
    match &finished[0] {
        Some(error) => assert_eq!(error.not_loaded_font_families, ["Other"]),
        None => panic!("expected Other to be reported as not loaded"),
    }
}

#[test]
fn a_metric_twin_of_one_baseline_is_caught_by_the_other() {
    let (event_loop, surface) = host();
    // Identical metrics to the cursive baseline: the cursive probe never
    // diverges, the serif probe does.
    surface.borrow_mut().register_face(
        "CursiveTwin",
        FaceMetrics {
            advance_factor: 0.62,
            line_height_factor: 1.34,
        },
    );
    let (delegate, loaded, finished) = recording_delegate();

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["CursiveTwin"],
        delegate,
        Some(Duration::from_millis(5000)),
    );
    loader.load_fonts();
    event_loop.run_until_idle();

    surface.borrow_mut().activate_face("CursiveTwin");
    event_loop.run_until_idle();

    assert_eq!(*loaded.borrow(), ["CursiveTwin"]);
    assert_eq!(*finished.borrow(), vec![None]);
}

#[test]
fn all_loaded_and_deadline_in_the_same_tick_finish_once() {
    let (event_loop, surface) = host();
    surface.borrow_mut().register_face("Alpha", wide_face());
    let (delegate, loaded, finished) = recording_delegate();

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Alpha"],
        delegate,
        Some(Duration::from_millis(1000)),
    );
    loader.load_fonts();
    event_loop.run_until_idle();

    // Divergence signals are queued but undelivered when the deadline
    // elapses; both completion paths race inside one advance.
    surface.borrow_mut().activate_face("Alpha");
    event_loop.advance(Duration::from_millis(1000));

    assert_eq!(*loaded.borrow(), ["Alpha"]);
    assert_eq!(*finished.borrow(), vec![None]);
}

#[test]
fn divergence_after_the_deadline_is_ignored() {
    let (event_loop, surface) = host();
    surface.borrow_mut().register_face("Alpha", wide_face());
    let (delegate, loaded, finished) = recording_delegate();

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Alpha"],
        delegate,
        Some(Duration::from_millis(100)),
    );
    loader.load_fonts();
    event_loop.advance(Duration::from_millis(100));

    surface.borrow_mut().activate_face("Alpha");
    event_loop.run_until_idle();
    event_loop.advance(Duration::from_millis(1000));

    assert!(loaded.borrow().is_empty());
    let finished = finished.borrow();
    assert_eq!(finished.len(), 1);
    match &finished[0] {
        Some(error) => assert_eq!(error.not_loaded_font_families, ["Alpha"]),
        None => panic!("expected Alpha to be reported as not loaded"),
    }
}

#[test]
fn degraded_surfaces_fall_back_to_polling() {
    let (event_loop, surface) = host();
    surface.borrow_mut().set_scroll_events_supported(false);
    surface.borrow_mut().register_face("Alpha", wide_face());
    let (delegate, loaded, finished) = recording_delegate();

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Alpha"],
        delegate,
        Some(Duration::from_millis(10_000)),
    );
    loader.load_fonts();

    surface.borrow_mut().activate_face("Alpha");
    // No signals on a degraded surface: nothing happens until the poll tick.
    event_loop.run_until_idle();
    assert!(loaded.borrow().is_empty());

    event_loop.advance(Duration::from_millis(50));
    assert_eq!(*loaded.borrow(), ["Alpha"]);
    assert_eq!(*finished.borrow(), vec![None]);

    // The poll interval was cancelled with the run.
    event_loop.advance(Duration::from_millis(1000));
    assert_eq!(finished.borrow().len(), 1);
}

#[test]
fn polling_detects_already_active_fonts_synchronously() {
    let (event_loop, surface) = host();
    surface.borrow_mut().set_scroll_events_supported(false);
    surface.borrow_mut().register_face("Alpha", wide_face());
    surface.borrow_mut().activate_face("Alpha");
    let (delegate, loaded, finished) = recording_delegate();

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Alpha"],
        delegate,
        Some(Duration::from_millis(10_000)),
    );
    loader.load_fonts();

    // The first synchronous check completes the run before any timer runs.
    assert_eq!(*loaded.borrow(), ["Alpha"]);
    assert_eq!(*finished.borrow(), vec![None]);
    event_loop.advance(Duration::from_millis(1000));
    assert_eq!(finished.borrow().len(), 1);
}

#[test]
fn duplicate_request_entries_collapse_to_one_family() {
    let (event_loop, surface) = host();
    surface.borrow_mut().register_face("Alpha", wide_face());
    let (delegate, loaded, finished) = recording_delegate();

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Alpha", "Alpha"],
        delegate,
        Some(Duration::from_millis(5000)),
    );
    assert_eq!(loader.font_families(), ["Alpha"]);
    loader.load_fonts();
    event_loop.run_until_idle();

    surface.borrow_mut().activate_face("Alpha");
    event_loop.run_until_idle();

    assert_eq!(*loaded.borrow(), ["Alpha"]);
    assert_eq!(*finished.borrow(), vec![None]);
}

#[test]
fn a_delegate_with_no_handlers_is_tolerated() {
    let (event_loop, surface) = host();
    surface.borrow_mut().register_face("Alpha", wide_face());

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Alpha"],
        LoaderDelegate::new(),
        Some(Duration::from_millis(1000)),
    );
    loader.load_fonts();
    event_loop.run_until_idle();

    surface.borrow_mut().activate_face("Alpha");
    event_loop.run_until_idle();
    event_loop.advance(Duration::from_millis(1000));

    // Nothing to assert beyond "no panic": both callbacks are absent and
    // silently skipped.
    let s = surface.borrow();
    let root = s.root();
    assert!(s.children_of(root).is_empty());
}

#[test]
fn baseline_cache_measures_once_until_reset() {
    let (_event_loop, surface) = host();
    let dyn_surface: Rc<RefCell<dyn RenderSurface>> = surface.clone();
    surface.borrow_mut().register_face(
        "Marker",
        FaceMetrics {
            advance_factor: 0.9,
            line_height_factor: 2.0,
        },
    );
    surface.borrow_mut().activate_face("Marker");

    let cache = BaselineCache::with_families(["serif", "Marker"]);
    let first = cache.sizes(&dyn_surface);

    // The face changes, but the cache never re-measures on its own.
    surface.borrow_mut().register_face(
        "Marker",
        FaceMetrics {
            advance_factor: 0.4,
            line_height_factor: 1.0,
        },
    );
    surface.borrow_mut().activate_face("Marker");
    assert_eq!(cache.sizes(&dyn_surface), first);

    cache.reset();
    let second = cache.sizes(&dyn_surface);
    assert_ne!(second, first);
    // serif itself did not change.
    assert_eq!(second[0], first[0]);
}

#[test]
fn probe_container_is_parked_offscreen_and_hidden() {
    let (event_loop, surface) = host();
    let (delegate, _loaded, _finished) = recording_delegate();

    let root_children_before = {
        let s = surface.borrow();
        let root = s.root();
        s.children_of(root).len()
    };

    let loader = loader(
        &(Rc::clone(&event_loop), Rc::clone(&surface)),
        &["Never"],
        delegate,
        Some(Duration::from_millis(1000)),
    );
    loader.load_fonts();

    {
        let s = surface.borrow();
        let root = s.root();
        let children = s.children_of(root);
        assert_eq!(children.len(), root_children_before + 1);
        let container = *children.last().unwrap();
        assert_eq!(s.offset_of(container), (-10_000, -10_000));
        assert!(s.is_hidden(container));
    }

    // Teardown removes the container again.
    event_loop.advance(Duration::from_millis(1000));
    let s = surface.borrow();
    let root = s.root();
    assert_eq!(s.children_of(root).len(), root_children_before);
}
