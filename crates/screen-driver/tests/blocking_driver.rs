//! Integration tests for the blocking screen driver.
//!
//! These run on the real clock with short travel durations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use screen_core::transport::mock::{FrameLog, RecordingTransport};
use screen_core::transport::share;
use screen_core::DeviceProfile;
use screen_driver::{
    Address, BlockingScreenDriver, MotionState, ProfileKind, ScreenConfig, ScreenError,
    ScreenStatus,
};

const UP: u8 = 0xDD;
const DOWN: u8 = 0xEE;
const STOP: u8 = 0xCC;

fn config(down_secs: f64) -> ScreenConfig {
    ScreenConfig {
        down_duration_secs: Some(down_secs),
        tick_interval_ms: Some(10),
        ..ScreenConfig::for_profile(ProfileKind::XyScreens)
    }
}

fn driver(config: &ScreenConfig) -> (BlockingScreenDriver, RecordingTransport, FrameLog) {
    let transport = RecordingTransport::new();
    let frames = transport.frames_handle();
    let driver = BlockingScreenDriver::new(Box::new(transport.clone()), config).unwrap();
    (driver, transport, frames)
}

fn opcodes(frames: &FrameLog) -> Vec<u8> {
    frames.lock().iter().map(|f| f[4]).collect()
}

#[test]
fn test_move_down_and_wait_snaps_to_endpoint() {
    let (screen, _, frames) = driver(&config(0.3));
    let ticks = Arc::new(AtomicUsize::new(0));
    let t = ticks.clone();
    screen.on_progress(move |_| {
        t.fetch_add(1, Ordering::SeqCst);
    });

    let start = Instant::now();
    let progress = screen.move_down_and_wait(None).unwrap();

    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(progress.position, 1.0);
    assert_eq!(progress.state, MotionState::Idle);
    assert_eq!(screen.status(), ScreenStatus::Down);
    assert!(ticks.load(Ordering::SeqCst) >= 5);
    assert_eq!(*frames.lock(), vec![vec![0xFF, 0xAA, 0xEE, 0xEE, DOWN]]);
}

#[test]
fn test_move_returns_after_write() {
    let (screen, _, frames) = driver(&config(5.0));

    let progress = screen.move_down(None).unwrap();
    assert_eq!(progress.state, MotionState::MovingDown);
    assert_eq!(opcodes(&frames), vec![DOWN]);

    thread::sleep(Duration::from_millis(50));
    let position = screen.position();
    assert!(position > 0.0 && position < 0.1, "{}", position);

    screen.stop().unwrap();
    assert_eq!(opcodes(&frames), vec![DOWN, STOP]);
}

#[test]
fn test_stop_from_other_thread_ends_wait() {
    let (screen, _, frames) = driver(&config(5.0));
    let ticks = Arc::new(AtomicUsize::new(0));
    let t = ticks.clone();
    screen.on_progress(move |_| {
        t.fetch_add(1, Ordering::SeqCst);
    });

    let waiter = {
        let screen = screen.clone();
        thread::spawn(move || screen.move_down_and_wait(None))
    };

    thread::sleep(Duration::from_millis(200));
    let started = Instant::now();
    let stopped = screen.stop().unwrap();
    let waited = waiter.join().unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(stopped.state, MotionState::Idle);
    assert!(stopped.position > 0.0 && stopped.position < 0.2);
    assert_eq!(waited.position, stopped.position);
    assert_eq!(opcodes(&frames), vec![DOWN, STOP]);

    let after_stop = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
}

#[test]
fn test_stop_from_callback() {
    let (screen, _, frames) = driver(&config(5.0));
    let handle = screen.clone();
    screen.on_progress(move |p| {
        if p.position >= 0.02 && p.state == MotionState::MovingDown {
            handle.stop().unwrap();
        }
    });

    let progress = screen.move_down_and_wait(None).unwrap();
    assert_eq!(progress.state, MotionState::Idle);
    assert!(progress.position < 0.1);
    assert_eq!(opcodes(&frames), vec![DOWN, STOP]);
}

#[test]
fn test_stop_when_idle() {
    let (screen, _, frames) = driver(&ScreenConfig::default());
    let progress = screen.stop().unwrap();
    assert_eq!(progress.state, MotionState::Idle);
    assert_eq!(progress.status, ScreenStatus::Up);
    assert_eq!(opcodes(&frames), vec![STOP]);
}

#[test]
fn test_move_to_target() {
    let mut cfg = config(0.5);
    cfg.initial_position = Some(1.0);
    let (screen, _, frames) = driver(&cfg);

    let progress = screen.move_to(0.4, None).unwrap();
    assert_eq!(progress.state, MotionState::Idle);
    assert!((progress.position - 0.4).abs() < 0.05, "{}", progress.position);
    assert_eq!(opcodes(&frames), vec![UP, STOP]);
}

#[test]
fn test_program_address() {
    let (screen, _, frames) = driver(&config(1.0));
    screen
        .program_address(Address::new([0xAA, 0xBB, 0xCC]))
        .unwrap();
    assert_eq!(*frames.lock(), vec![vec![0xFF, 0xAA, 0xBB, 0xCC, 0xAA]]);
    assert_eq!(screen.state(), MotionState::Idle);
    assert_eq!(screen.address().to_string(), "AABBCC");
}

#[test]
fn test_micro_steps() {
    let mut cfg = config(1.0);
    cfg.initial_position = Some(0.5);
    let (screen, _, frames) = driver(&cfg);

    screen.micro_down().unwrap();
    screen.micro_up().unwrap();
    assert_eq!(opcodes(&frames), vec![0xE9, 0xC9]);
    assert_eq!(screen.position(), 0.5);
}

#[test]
fn test_rejections_have_no_side_effects() {
    let (screen, transport, frames) = driver(&config(5.0));

    screen.move_down(None).unwrap();
    for err in [
        screen.move_down(None).unwrap_err(),
        screen.move_up(None).unwrap_err(),
        screen.program_address(Address::new([1, 2, 3])).unwrap_err(),
        screen.micro_down().unwrap_err(),
        screen.restore_position(0.5).unwrap_err(),
    ] {
        assert!(matches!(err, ScreenError::InvalidState { .. }), "{}", err);
    }
    assert_eq!(opcodes(&frames), vec![DOWN]);

    screen.stop().unwrap();
    transport.set_failing(true);
    let before = screen.position();
    assert!(matches!(
        screen.move_up(None).unwrap_err(),
        ScreenError::Transport(_)
    ));
    assert_eq!(screen.state(), MotionState::Idle);
    assert_eq!(screen.position(), before);
}

#[test]
fn test_two_screens_on_shared_bus() {
    let recorder = RecordingTransport::new();
    let frames = recorder.frames_handle();
    let bus = share(Box::new(recorder));

    let screen =
        BlockingScreenDriver::new(Box::new(bus.clone()), &config(1.0)).unwrap();
    let lift = BlockingScreenDriver::new(
        Box::new(bus),
        &ScreenConfig {
            down_duration_secs: Some(1.0),
            ..ScreenConfig::for_profile(ProfileKind::SeeMax)
        },
    )
    .unwrap();

    let threads: Vec<_> = [screen.clone(), lift.clone()]
        .into_iter()
        .map(|s| thread::spawn(move || s.stop().unwrap()))
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    lift.close().unwrap();
    screen.stop().unwrap();

    let frames = frames.lock();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.len() == 5 && f[4] == STOP));
    assert!(frames.contains(&vec![0xFF, 0xEE, 0xEE, 0xEE, STOP]));
}

#[test]
fn test_zero_tick_interval_does_not_spin() {
    let profile = DeviceProfile::builder(ProfileKind::XyScreens)
        .down_duration(Duration::from_millis(300))
        .build()
        .unwrap();
    let address = profile.default_address();
    let screen = BlockingScreenDriver::with_profile(
        Box::new(RecordingTransport::new()),
        profile,
        address,
        Duration::ZERO,
    );
    let ticks = Arc::new(AtomicUsize::new(0));
    let t = ticks.clone();
    screen.on_progress(move |_| {
        t.fetch_add(1, Ordering::SeqCst);
    });

    let progress = screen.move_down_and_wait(None).unwrap();
    assert_eq!(progress.position, 1.0);
    // One tick per millisecond at most, plus the final update.
    let count = ticks.load(Ordering::SeqCst);
    assert!(count > 0 && count < 1000, "{} ticks", count);
}
