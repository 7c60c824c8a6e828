mod common;

use std::{cell::RefCell, rc::Rc};

use common::*;
use lifesim::sim::{CellBackend, GameState, StatsSnapshot, cpu::CpuBackend};

fn run_ticks(engine: &mut lifesim::engine::GameEngine<CpuBackend>, start_ms: f64, ticks: u32) -> f64 {
    let interval = interval_ms(engine);
    let mut now = start_ms;
    for _ in 0..ticks {
        engine.frame(now).unwrap();
        now += interval;
    }
    now
}

#[test]
fn blinker_oscillates() {
    let mut engine = empty_engine(16, 16);
    engine.seed(|x, y| x == 8 && (7..=9).contains(&y));
    let vertical = live_cells(&engine);

    assert_eq!(engine.toggle_play(), GameState::Running);
    let now = run_ticks(&mut engine, 0.0, 1);
    assert_eq!(engine.generation(), 1);
    assert_eq!(live_cells(&engine), vec![(7, 8), (8, 8), (9, 8)]);

    run_ticks(&mut engine, now, 1);
    assert_eq!(engine.generation(), 2);
    assert_eq!(live_cells(&engine), vertical);
}

#[test]
fn blinker_on_the_edge_uses_clamped_neighbours() {
    // a bar hugging the bottom edge sees its own row again below it, so the
    // centre is overcrowded instead of turning into a vertical bar
    let mut engine = empty_engine(8, 8);
    engine.seed(|x, y| y == 0 && (2..=4).contains(&x));
    engine.toggle_play();
    run_ticks(&mut engine, 0.0, 1);
    assert_eq!(live_cells(&engine), vec![(2, 0), (4, 0), (3, 1)]);
}

#[test]
fn glider_translates_diagonally() {
    let mut engine = empty_engine(32, 32);
    let glider = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)];
    engine.seed(|x, y| glider.contains(&(x.wrapping_sub(10), y.wrapping_sub(10))));
    let start = live_cells(&engine);

    engine.toggle_play();
    let mut now = 0.0;
    for _ in 0..4 {
        now = run_ticks(&mut engine, now, 1);
        assert_eq!(live_cells(&engine).len(), 5);
    }
    assert_eq!(engine.generation(), 4);
    let moved: Vec<_> = start.iter().map(|&(x, y)| (x + 1, y + 1)).collect();
    assert_eq!(live_cells(&engine), moved);
}

#[test]
fn every_published_snapshot_covers_the_grid() {
    let backend = CpuBackend::new(37, 23);
    let mut engine = engine_with(backend, 37, 23, |c| {
        c.random_percentage = 0.3;
        c.stats_interval_ms = 10.0;
    });
    let seen = Rc::new(RefCell::new(Vec::<StatsSnapshot>::new()));
    let sink = seen.clone();
    engine.on_stats_update(move |s| sink.borrow_mut().push(*s));

    engine.toggle_play();
    let mut now = 0.0;
    for _ in 0..200 {
        engine.frame(now).unwrap();
        now += 5.0;
    }
    let seen = seen.borrow();
    assert!(seen.len() > 10);
    assert!(seen.iter().all(|s| s.total() == 37 * 23));
    assert!(seen.windows(2).all(|w| w[0].generation <= w[1].generation));
}

#[test]
fn generation_counts_rule_ticks_only() {
    let mut engine = empty_engine(16, 16);
    engine.seed(|x, y| x == 8 && (7..=9).contains(&y));
    engine.toggle_play();
    let interval = interval_ms(&engine);

    // several frames inside one interval: one tick
    engine.frame(0.0).unwrap();
    engine.frame(interval * 0.25).unwrap();
    engine.frame(interval * 0.5).unwrap();
    assert_eq!(engine.generation(), 1);

    // a long stall does not burst-tick on resume
    engine.frame(interval * 10.2).unwrap();
    assert_eq!(engine.generation(), 2);
    engine.frame(interval * 10.7).unwrap();
    assert_eq!(engine.generation(), 2);
    engine.frame(interval * 11.1).unwrap();
    assert_eq!(engine.generation(), 3);
}

#[test]
fn refresh_rate_matching_speed_ticks_every_frame() {
    let mut engine = empty_engine(16, 16);
    engine.set_speed(60.0).unwrap();
    engine.toggle_play();
    for k in 0..600 {
        engine.frame(k as f64 * 1000.0 / 60.0).unwrap();
        assert_eq!(engine.generation(), k + 1, "frame {k}");
    }
}

#[test]
fn faster_display_ticks_at_configured_speed() {
    let mut engine = empty_engine(16, 16);
    engine.set_speed(60.0).unwrap();
    engine.toggle_play();
    for k in 0..600 {
        engine.frame(k as f64 * 1000.0 / 120.0).unwrap();
    }
    assert_eq!(engine.generation(), 300);
}

#[test]
fn paused_engine_keeps_generation() {
    let mut engine = empty_engine(16, 16);
    engine.seed(|x, y| x == 8 && (7..=9).contains(&y));
    engine.toggle_play();
    let now = run_ticks(&mut engine, 0.0, 3);
    assert_eq!(engine.toggle_play(), GameState::Paused);

    let frozen = live_cells(&engine);
    let steps = engine.backend().steps();
    run_ticks(&mut engine, now, 20);
    assert_eq!(engine.generation(), 3);
    assert_eq!(live_cells(&engine), frozen);
    assert_eq!(engine.backend().steps(), steps);
}

#[test]
fn resize_reseeds_at_configured_density() {
    fastrand::seed(42);
    let backend = CpuBackend::new(64, 64);
    let mut engine = engine_with(backend, 64, 64, |c| c.random_percentage = 0.2);
    let seen = Rc::new(RefCell::new(Vec::<StatsSnapshot>::new()));
    let sink = seen.clone();
    engine.on_stats_update(move |s| sink.borrow_mut().push(*s));

    engine.toggle_play();
    engine.frame(0.0).unwrap();
    assert_eq!(engine.generation(), 1);

    engine.set_scene_dimensions(256, 256).unwrap();
    assert_eq!(engine.backend().dimensions(), (256, 256));
    assert_eq!(engine.backend().active_cells().len(), 256 * 256);
    assert_eq!(engine.generation(), 0);
    assert_eq!(engine.state(), GameState::Running);

    // still inside the tick interval: the forced sample sees the fresh seed
    engine.frame(1.0).unwrap();
    engine.frame(2.0).unwrap();
    let last = *seen.borrow().last().unwrap();
    assert_eq!(last.generation, 0);
    assert_eq!(last.total(), 256 * 256);
    let fraction = last.alive_count as f64 / last.total() as f64;
    assert!((fraction - 0.2).abs() < 0.01, "alive fraction {fraction}");
}

#[test]
fn wrap_boundary_is_toroidal() {
    let backend = CpuBackend::new(8, 8);
    let mut engine = engine_with(backend, 8, 8, |c| {
        c.boundary = lifesim::sim::kernel::BoundaryMode::Wrap;
    });
    engine.seed(|x, y| y == 0 && (2..=4).contains(&x));
    engine.toggle_play();
    run_ticks(&mut engine, 0.0, 1);
    assert_eq!(live_cells(&engine), vec![(3, 0), (3, 1), (3, 7)]);
}
