use std::time::SystemTime;

use lifesim::{
    config::EngineConfig,
    engine::GameEngine,
    sim::{GameState, cpu::CpuBackend},
};

const LOG_ENV: &str = "LIFESIM_LOG";

fn main() {
    setup_logging();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("--headless") => {
            let generations = args.next().and_then(|g| g.parse().ok()).unwrap_or(1000);
            run_headless(generations);
        }
        _ => lifesim::start(),
    }
}

fn setup_logging() {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|l| l.parse().ok())
        .unwrap_or(log::LevelFilter::Info);
    let _ = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        // wgpu is very chatty at info
        .level_for("wgpu_core", log::LevelFilter::Warn)
        .level_for("wgpu_hal", log::LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply();
}

/// Run the CPU backend flat out for `generations` ticks and report the
/// throughput.
fn run_headless(generations: u64) {
    let config = EngineConfig::default();
    let backend = CpuBackend::new(config.width, config.height);
    let mut engine = match GameEngine::new(backend, config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("invalid configuration: {e}");
            return;
        }
    };
    engine.on_stats_update(|stats| {
        log::info!(
            "generation {}: {} alive, {} dead",
            stats.generation,
            stats.alive_count,
            stats.dead_count
        );
    });
    if let Err(e) = engine.set_speed(f32::MAX) {
        log::error!("{e}");
        return;
    }
    if engine.toggle_play() != GameState::Running {
        return;
    }

    let start = SystemTime::now();
    let mut now_ms = 0.0;
    while engine.generation() < generations {
        now_ms += 1.0;
        // the CPU backend presents into memory and never fails
        let _ = engine.frame(now_ms);
    }
    let elapsed = start.elapsed().unwrap_or_default();
    log::info!(
        "{generations} generations in {} ({:.1} generations/s)",
        humantime::format_duration(elapsed),
        generations as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
}
