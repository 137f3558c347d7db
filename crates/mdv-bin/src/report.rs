//! Plain-text summary printed after a session.

use core_pipeline::{PaintSnapshot, PipelineStats};
use std::fmt::Write as _;
use std::time::Duration;

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub fn render_report(stats: &PipelineStats, paint: &PaintSnapshot, wall: Duration) -> String {
    let mut out = String::new();
    let c = &stats.chunks;
    let r = &stats.render;
    let p = &stats.preload;
    let d = &stats.predict;
    let m = &stats.cache;
    let _ = writeln!(out, "session      {:.1} ms", ms(wall));
    let _ = writeln!(
        out,
        "document     {} lines in {} chunks ({} resident, max {})",
        c.total_lines, c.total_chunks, c.resident_chunks, c.max_loaded_chunks
    );
    let _ = writeln!(
        out,
        "chunks       hit rate {:.1}%  loads {}  evictions {}  storage failures {}",
        c.hit_rate() * 100.0,
        c.loads,
        c.evictions,
        c.storage_failures
    );
    let _ = writeln!(
        out,
        "render       frames {} (full {}, incremental {})  coalesced {}  escalations {}  avg {:.3} ms",
        r.metrics.frames,
        r.metrics.full_frames,
        r.metrics.incremental_frames,
        r.metrics.coalesced_requests,
        r.metrics.escalations,
        ms(r.average_render_time)
    );
    let _ = writeln!(
        out,
        "paint        lines {}  gutter repaints {}",
        paint.lines_painted, paint.gutter_repaints
    );
    let _ = writeln!(
        out,
        "preload      triggered {}  completed {}  timeouts {}  hit rate {:.1}%  lookahead {} lines",
        p.triggered,
        p.completed,
        p.timeouts,
        p.hit_rate() * 100.0,
        p.preload_lines
    );
    let _ = writeln!(
        out,
        "predict      behaviors {}  accuracy {:.1}%  pre-rendered {} (hits {})",
        d.behaviors_recorded,
        d.accuracy * 100.0,
        d.pre_render_cached,
        d.pre_render_hits
    );
    let _ = write!(
        out,
        "cache        {} / {} bytes ({:.1}%)  rebalances {}",
        m.estimated_memory, m.total_memory_limit, m.memory_usage_percent, m.adjustments
    );
    out
}
