//! Timer-driven behavior of the render optimizer under paused tokio time.

use core_config::{RenderConfig, ViewportConfig};
use core_render::{LayerInvalidation, RenderContext, RenderOptimizer, ScheduleMode};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn render_config(use_raf: bool, target_fps: u32) -> RenderConfig {
    RenderConfig {
        debounce_delay_ms: 16,
        target_fps,
        use_raf,
        refresh_interval_ms: 16,
    }
}

fn viewport() -> ViewportConfig {
    ViewportConfig {
        width: 800.0,
        height: 600.0,
        line_height: 26.0,
        padding: 10.0,
        char_width: 8.0,
    }
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn painter(log: &Log, tag: &'static str) -> impl FnOnce(&mut RenderContext<'_>) + Send + 'static {
    let log = log.clone();
    move |_ctx| log.lock().unwrap().push(tag)
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn animation_frame_coalesces_requests() {
    let opt = RenderOptimizer::new(&render_config(true, 60), &viewport());
    let log: Log = Arc::default();
    opt.request_render(painter(&log, "first"), false);
    opt.request_render(painter(&log, "second"), false);
    opt.request_render(painter(&log, "third"), false);
    assert!(opt.has_pending_render());
    assert!(log.lock().unwrap().is_empty());

    advance(20).await;
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
    let stats = opt.stats();
    assert_eq!(stats.mode, ScheduleMode::AnimationFrame);
    assert_eq!(stats.metrics.coalesced_requests, 2);
    assert_eq!(stats.metrics.frames, 1);
    assert!(!stats.pending_render);
}

#[tokio::test(start_paused = true)]
async fn debounce_keeps_latest_callback() {
    let opt = RenderOptimizer::new(&render_config(false, 60), &viewport());
    let log: Log = Arc::default();
    opt.request_render(painter(&log, "stale"), false);
    advance(10).await;
    opt.request_render(painter(&log, "latest"), false);
    advance(10).await;
    assert!(log.lock().unwrap().is_empty(), "timer restarted by second request");
    advance(10).await;
    assert_eq!(*log.lock().unwrap(), vec!["latest"]);
    assert_eq!(opt.stats().metrics.debounce_restarts, 1);
}

#[tokio::test(start_paused = true)]
async fn frame_rate_limit_redefers() {
    // 20 fps: frames at least 50ms apart, refresh every 16ms.
    let opt = RenderOptimizer::new(&render_config(true, 20), &viewport());
    let log: Log = Arc::default();
    opt.request_render(painter(&log, "now"), true);
    opt.request_render(painter(&log, "paced"), false);

    advance(40).await;
    assert_eq!(*log.lock().unwrap(), vec!["now"]);
    advance(30).await;
    assert_eq!(*log.lock().unwrap(), vec!["now", "paced"]);
    assert!(opt.stats().metrics.deferred_frames >= 2);
}

#[tokio::test(start_paused = true)]
async fn force_render_supersedes_pending() {
    let opt = RenderOptimizer::new(&render_config(true, 60), &viewport());
    let log: Log = Arc::default();
    opt.request_render(painter(&log, "scheduled"), false);
    opt.force_render(painter(&log, "forced"));
    advance(100).await;
    assert_eq!(*log.lock().unwrap(), vec!["forced"]);
    assert_eq!(opt.stats().metrics.forced_renders, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_pending_render_skips_paint() {
    let opt = RenderOptimizer::new(&render_config(false, 60), &viewport());
    let log: Log = Arc::default();
    opt.request_render(painter(&log, "never"), false);
    assert!(opt.cancel_pending_render());
    assert!(!opt.cancel_pending_render());
    advance(100).await;
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(opt.stats().metrics.cancelled_renders, 1);
}

#[tokio::test(start_paused = true)]
async fn destroy_is_idempotent_and_final() {
    let opt = RenderOptimizer::new(&render_config(true, 60), &viewport());
    let log: Log = Arc::default();
    opt.request_render(painter(&log, "pending"), false);
    opt.destroy();
    opt.destroy();
    opt.request_render(painter(&log, "late"), false);
    opt.request_render(painter(&log, "late-immediate"), true);
    opt.force_render(painter(&log, "late-forced"));
    advance(100).await;
    assert!(log.lock().unwrap().is_empty());
    assert!(opt.stats().destroyed);
}

#[tokio::test(start_paused = true)]
async fn dropping_last_handle_cancels_frame() {
    let log: Log = Arc::default();
    {
        let opt = RenderOptimizer::new(&render_config(true, 60), &viewport());
        opt.request_render(painter(&log, "orphan"), false);
    }
    advance(100).await;
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn paint_receives_and_consumes_dirty_state() {
    let opt = RenderOptimizer::new(&render_config(true, 60), &viewport());
    opt.add_dirty_region(5, 6);
    opt.add_dirty_region(8, 9);
    opt.add_dirty_region(40, 41);
    opt.invalidate_static_layer(LayerInvalidation::THEME);

    let seen = Arc::new(Mutex::new(None));
    let s = seen.clone();
    opt.request_render(
        move |ctx| {
            let regions: Vec<(usize, usize)> = ctx
                .dirty_regions
                .iter()
                .map(|r| (r.start_line, r.end_line))
                .collect();
            *s.lock().unwrap() = Some((ctx.full_render, regions, ctx.static_layer_dirty));
        },
        false,
    );
    advance(20).await;
    assert_eq!(
        seen.lock().unwrap().clone(),
        Some((false, vec![(5, 9), (40, 41)], true))
    );
    let stats = opt.stats();
    assert_eq!(stats.dirty_regions, 0);
    assert!(!stats.static_layer_dirty);
    assert_eq!(stats.metrics.incremental_frames, 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_paint_does_not_wedge_the_loop() {
    let opt = RenderOptimizer::new(&render_config(true, 60), &viewport());
    opt.mark_full_render();
    opt.request_render(|_| panic!("paint exploded"), false);
    advance(20).await;
    let stats = opt.stats();
    assert_eq!(stats.metrics.paint_failures, 1);
    assert!(!stats.full_render_pending, "dirty state consumed");
    assert!(stats.static_layer_dirty, "failed paint leaves layer dirty");

    let log: Log = Arc::default();
    opt.request_render(painter(&log, "recovered"), false);
    advance(100).await;
    assert_eq!(*log.lock().unwrap(), vec!["recovered"]);
}

#[tokio::test(start_paused = true)]
async fn resize_marks_static_layer_dirty() {
    let opt = RenderOptimizer::new(&render_config(true, 60), &viewport());
    opt.force_render(|_| {});
    assert!(!opt.static_layer_dirty());
    opt.set_viewport_size(1024.0, 768.0);
    assert!(opt.static_layer_dirty());

    let size = Arc::new(Mutex::new((0.0, 0.0)));
    let s = size.clone();
    opt.force_render(move |ctx| {
        *s.lock().unwrap() = (ctx.static_layer.width(), ctx.static_layer.height());
    });
    assert_eq!(*size.lock().unwrap(), (1024.0, 768.0));
}
