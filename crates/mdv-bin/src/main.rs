//! mdv entrypoint: replays a scripted reading session against the view core.
use anyhow::{Context, Result};
use clap::Parser;
use core_pipeline::{Pipeline, SurfacePainter};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Instant;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;

mod report;
mod session;

use session::{Cursor, Step};

const LOG_FILE: &str = "mdv.log";

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "mdv", version, about = "Virtualized Markdown view core driver")]
struct Args {
    /// Markdown file to open. A synthetic document is generated when omitted.
    pub path: Option<PathBuf>,
    /// Configuration file path (overrides discovery of `mdv.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Number of scripted session steps.
    #[arg(long, default_value_t = 200)]
    pub steps: usize,
    /// Length of the synthetic document.
    #[arg(long, default_value_t = 20_000)]
    pub lines: usize,
}

fn configure_logging() -> Option<WorkerGuard> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join(LOG_FILE);
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
        .ok()
        .map(|_| guard)
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn load_document(args: &Args) -> Result<String> {
    match args.path.as_ref() {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            debug!(target: "io", file = %path.display(), size_bytes = text.len(), "file_read_ok");
            Ok(text)
        }
        None => Ok(session::generate_markdown(args.lines)),
    }
}

fn cursor(pipeline: &Pipeline) -> Cursor {
    let vp = pipeline.viewport();
    Cursor {
        scroll_top: vp.scroll_top(),
        first_visible: vp.visible_range(0).start,
        total_lines: vp.total_lines(),
        line_height: vp.line_height(),
        page_lines: vp.lines_per_page(),
    }
}

async fn run(args: Args) -> Result<()> {
    let config = core_config::load_from(args.config.clone())?;
    let text = load_document(&args)?;
    let frame_interval = config.file.render.refresh_interval();

    let painter = SurfacePainter::new();
    let paint_counters = painter.counters();
    let mut pipeline = Pipeline::new(&config.file, painter);
    pipeline.open_text(&text).await?;
    info!(
        target: "runtime.startup",
        path = ?args.path,
        config_override = args.config.is_some(),
        steps = args.steps,
        "bootstrap_complete"
    );

    let started = Instant::now();
    pipeline.frame(true).await;
    for n in 0..args.steps {
        match session::next_step(n, cursor(&pipeline)) {
            Step::Scroll(top) => {
                pipeline.on_scroll(top);
            }
            Step::Edit(start, end) => {
                pipeline.on_edit(start, end);
            }
            Step::Jump(line) => {
                pipeline.on_jump(line);
            }
            Step::Search(query) => pipeline.on_search(&query),
        }
        pipeline.frame(false).await;
        if n % 10 == 0 {
            pipeline.pre_render_ahead().await;
        }
        tokio::time::sleep(frame_interval).await;
    }
    pipeline.frame(true).await;
    let wall = started.elapsed();

    let stats = pipeline.stats();
    println!("{}", report::render_report(&stats, &paint_counters.snapshot(), wall));
    pipeline.destroy();
    info!(target: "runtime", steps = args.steps, wall_ms = wall.as_millis() as u64, "shutdown");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _log_guard = configure_logging();
    install_panic_hook();
    info!(target: "runtime", "startup");
    run(Args::parse()).await
}
