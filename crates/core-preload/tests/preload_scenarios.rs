//! Preload triggering, single-flight and timeout behavior under paused time.

use core_config::PreloadConfig;
use core_predict::{ActionKind, Prediction};
use core_preload::{PreloadHandler, PreloadManager, PreloadRange, ScrollDirection, SpeedClass};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const LINE_HEIGHT: f64 = 20.0;
const VIEWPORT: f64 = 600.0;
/// 150 lines.
const TOTAL: f64 = 3000.0;

type Seen = Arc<Mutex<Vec<(usize, usize)>>>;

fn recording_handler(seen: &Seen) -> Arc<dyn PreloadHandler> {
    let seen = seen.clone();
    Arc::new(move |range: PreloadRange| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push((range.start_line, range.end_line));
            Ok::<_, anyhow::Error>(())
        }
    })
}

fn sleeping_handler(delay: Duration, done: Arc<AtomicBool>) -> Arc<dyn PreloadHandler> {
    Arc::new(move |_range: PreloadRange| {
        let done = done.clone();
        async move {
            tokio::time::sleep(delay).await;
            done.store(true, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
    })
}

fn config(timeout_ms: u64) -> PreloadConfig {
    PreloadConfig {
        preload_timeout_ms: timeout_ms,
        ..PreloadConfig::default()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn direction_flips_on_the_next_sample() {
    let m = PreloadManager::new(PreloadConfig::default(), LINE_HEIGHT);
    let t0 = Instant::now();
    m.update_scroll_at(0.0, VIEWPORT, 100_000.0, t0);
    assert_eq!(m.scroll_direction(), ScrollDirection::None);

    m.update_scroll_at(500.0, VIEWPORT, 100_000.0, t0 + Duration::from_millis(10));
    assert_eq!(m.scroll_direction(), ScrollDirection::Down);
    assert!((m.scroll_speed() - 50.0).abs() < 1e-9);

    m.update_scroll_at(400.0, VIEWPORT, 100_000.0, t0 + Duration::from_millis(20));
    assert_eq!(m.scroll_direction(), ScrollDirection::Up);
    assert!((m.scroll_speed() - 10.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn nearing_bottom_preloads_lines_past_the_edge() {
    let seen: Seen = Arc::default();
    let m = PreloadManager::with_handler(PreloadConfig::default(), LINE_HEIGHT, recording_handler(&seen));

    // 250px from the bottom: outside the 180px threshold.
    assert_eq!(m.update_scroll(2150.0, VIEWPORT, TOTAL), None);
    // 150px from the bottom.
    let range = m.update_scroll(2250.0, VIEWPORT, TOTAL).unwrap();
    assert_eq!((range.start_line, range.end_line), (143, 150));
    assert_eq!(range.direction, ScrollDirection::Down);
    assert!(m.is_preloading());

    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![(143, 150)]);
    let stats = m.stats();
    assert!(!stats.preloading);
    assert_eq!(stats.triggered, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.hit_rate(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn nearing_top_preloads_lines_above() {
    let seen: Seen = Arc::default();
    let m = PreloadManager::with_handler(PreloadConfig::default(), LINE_HEIGHT, recording_handler(&seen));
    m.update_scroll(300.0, VIEWPORT, TOTAL);
    let range = m.update_scroll(100.0, VIEWPORT, TOTAL).unwrap();
    assert_eq!((range.start_line, range.end_line), (0, 5));
    assert_eq!(range.direction, ScrollDirection::Up);
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec![(0, 5)]);
}

#[tokio::test(start_paused = true)]
async fn repeated_range_is_skipped_by_memo() {
    let seen: Seen = Arc::default();
    let m = PreloadManager::with_handler(PreloadConfig::default(), LINE_HEIGHT, recording_handler(&seen));
    m.update_scroll(2200.0, VIEWPORT, TOTAL);
    assert!(m.update_scroll(2250.0, VIEWPORT, TOTAL).is_some());
    settle().await;

    assert!(m.update_scroll(2251.0, VIEWPORT, TOTAL).is_none());
    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(m.stats().skipped_duplicate, 1);
    assert_eq!(m.stats().memo_len, 1);
}

#[tokio::test(start_paused = true)]
async fn only_one_preload_in_flight() {
    let done = Arc::new(AtomicBool::new(false));
    let m = PreloadManager::with_handler(
        config(5000),
        LINE_HEIGHT,
        sleeping_handler(Duration::from_millis(200), done.clone()),
    );
    m.update_scroll(2200.0, VIEWPORT, TOTAL);
    assert!(m.update_scroll(2250.0, VIEWPORT, TOTAL).is_some());
    settle().await;
    assert!(m.is_preloading());

    assert!(m.update_scroll(2300.0, VIEWPORT, TOTAL).is_none());
    assert_eq!(m.stats().skipped_in_flight, 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(done.load(Ordering::SeqCst));
    assert!(!m.is_preloading());
}

#[tokio::test(start_paused = true)]
async fn stalled_handler_times_out_and_frees_the_slot() {
    let m = PreloadManager::with_handler(
        config(100),
        LINE_HEIGHT,
        Arc::new(|_range: PreloadRange| std::future::pending::<anyhow::Result<()>>()),
    );
    m.update_scroll(2200.0, VIEWPORT, TOTAL);
    let range = m.update_scroll(2250.0, VIEWPORT, TOTAL).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stats = m.stats();
    assert_eq!(stats.timeouts, 1);
    assert!(!stats.preloading);
    assert!(!m.was_preloaded(&range), "timed-out range can be retried");
    assert!(m.update_scroll(2260.0, VIEWPORT, TOTAL).is_some());
}

#[tokio::test(start_paused = true)]
async fn handler_failure_is_logged_and_retryable() {
    let m = PreloadManager::with_handler(
        PreloadConfig::default(),
        LINE_HEIGHT,
        Arc::new(|_range: PreloadRange| async { Err::<(), _>(anyhow::anyhow!("lexer busy")) }),
    );
    m.update_scroll(2200.0, VIEWPORT, TOTAL);
    m.update_scroll(2250.0, VIEWPORT, TOTAL);
    settle().await;
    let stats = m.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.memo_len, 0);
}

#[tokio::test(start_paused = true)]
async fn fast_prediction_widens_lookahead() {
    let seen: Seen = Arc::default();
    let m = PreloadManager::with_handler(PreloadConfig::default(), LINE_HEIGHT, recording_handler(&seen));
    let fast = Prediction {
        next_scroll_direction: ScrollDirection::Down,
        next_scroll_speed: SpeedClass::Fast,
        likely_action: ActionKind::Scroll,
    };
    assert_eq!(m.apply_prediction(&fast), 30);

    // Viewport 2000px arms within 600px (30 lines) of the 500-line end.
    m.update_scroll(7300.0, 2000.0, 10_000.0);
    let range = m.update_scroll(7410.0, 2000.0, 10_000.0).unwrap();
    assert_eq!((range.start_line, range.end_line), (471, 500));
}

#[tokio::test(start_paused = true)]
async fn destroy_aborts_in_flight_preload() {
    let done = Arc::new(AtomicBool::new(false));
    let m = PreloadManager::with_handler(
        config(5000),
        LINE_HEIGHT,
        sleeping_handler(Duration::from_millis(100), done.clone()),
    );
    m.update_scroll(2200.0, VIEWPORT, TOTAL);
    m.update_scroll(2250.0, VIEWPORT, TOTAL);
    settle().await;
    m.destroy();
    m.destroy();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!done.load(Ordering::SeqCst));
    assert!(!m.is_preloading());
    assert_eq!(m.update_scroll(2260.0, VIEWPORT, TOTAL), None);
}
