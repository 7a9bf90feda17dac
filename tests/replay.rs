//! End-to-end replays against the virtual injector.

use std::thread;
use std::time::{Duration, Instant};

use retrace::backends::{InjectedCall, Op, VirtualInjector, VirtualLog};
use retrace::keycode::{button, vc, Button, DeviceCode, Key};
use retrace::scheduler::SchedulerOptions;
use retrace::{
    format, share, Connected, EventLog, InputEvent, KeyAction, PointerAction, RepeatPolicy,
    ReplayOptions, Replayer,
};

const EPSILON: Duration = Duration::from_millis(15);
const A: DeviceCode = DeviceCode::Key(Key::Letter('a'));

fn options() -> ReplayOptions {
    ReplayOptions {
        scheduler: SchedulerOptions {
            drain_grace: Duration::from_millis(30),
            ..SchedulerOptions::default()
        },
        start_lead: Duration::from_millis(20),
        ..ReplayOptions::default()
    }
}

fn replayer() -> (Replayer, VirtualLog) {
    let injector = VirtualInjector::new("virtual:it");
    let log = injector.log();
    (Replayer::new(Connected::new(share(injector)), options()), log)
}

fn assert_balanced(log: &VirtualLog) {
    for (code, net) in log.net_presses() {
        assert_eq!(net, 0, "{code} left with net {net} presses");
    }
}

fn close(a: Duration, b: Duration) -> bool {
    let diff = if a > b { a - b } else { b - a };
    diff < EPSILON
}

fn first_press(calls: &[InjectedCall]) -> Instant {
    calls
        .iter()
        .find(|c| matches!(c.op, Op::Press(_)))
        .map(|c| c.at)
        .expect("a press was injected")
}

#[test]
fn press_and_release_fire_at_their_offsets() {
    let (replayer, log) = replayer();
    let events = EventLog::from_events([
        InputEvent::key(0, KeyAction::Pressed, vc::A),
        InputEvent::key(100, KeyAction::Released, vc::A),
    ])
    .unwrap();

    let summary = replayer.run(&events, RepeatPolicy::Times(1)).unwrap();
    assert_eq!(summary.fired(), 2);
    assert_eq!(summary.forced_releases(), 0);

    let calls = log.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].op, Op::Press(A));
    assert_eq!(calls[1].op, Op::Release(A));
    let gap = calls[1].at.duration_since(calls[0].at);
    assert!(
        close(gap, Duration::from_millis(100)),
        "release came {gap:?} after press"
    );
}

#[test]
fn lone_press_is_force_released() {
    let (replayer, log) = replayer();
    let events = EventLog::from_events([InputEvent::key(0, KeyAction::Pressed, vc::A)]).unwrap();

    let summary = replayer.run(&events, RepeatPolicy::Times(1)).unwrap();
    assert_eq!(log.ops(), vec![Op::Press(A), Op::Release(A)]);
    assert_eq!(summary.forced_releases(), 1);
    assert_balanced(&log);
}

#[test]
fn firing_times_track_offsets_across_channels() {
    let (replayer, log) = replayer();
    let offsets = [0u64, 25, 50, 90, 140];
    let mut events = Vec::new();
    for (i, ms) in offsets.iter().enumerate() {
        let action = if i % 2 == 0 {
            KeyAction::Pressed
        } else {
            KeyAction::Released
        };
        events.push(InputEvent::key(*ms, action, vc::SHIFT));
        events.push(InputEvent::pointer(*ms, PointerAction::Moved, button::NONE, i as i32, 0));
    }
    let events = EventLog::from_events(events).unwrap();

    replayer.run(&events, RepeatPolicy::Times(1)).unwrap();

    let calls = log.calls();
    let start = first_press(&calls);
    let shift_times: Vec<_> = calls
        .iter()
        .filter(|c| !matches!(c.op, Op::Move { .. }))
        .map(|c| c.at.duration_since(start))
        .collect();
    // Three presses, two releases, one forced release at the drain.
    assert_eq!(shift_times.len(), 6);
    for (fired, ms) in shift_times.iter().zip(offsets) {
        let target = Duration::from_millis(ms);
        assert!(close(*fired, target), "{fired:?} vs {target:?}");
    }

    let moves: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c.op, Op::Move { .. }))
        .collect();
    assert_eq!(moves.len(), offsets.len());
    for (call, ms) in moves.iter().zip(offsets) {
        let fired = call.at.saturating_duration_since(start);
        assert!(close(fired, Duration::from_millis(ms)));
    }
    assert_balanced(&log);
}

#[test]
fn unmapped_code_is_dropped_and_the_rest_replays() {
    let (replayer, log) = replayer();
    let events = EventLog::from_events([
        InputEvent::key(0, KeyAction::Pressed, vc::A),
        InputEvent::key(5, KeyAction::Pressed, 0x7ABC),
        InputEvent::key(10, KeyAction::Released, vc::A),
        InputEvent::key(15, KeyAction::Released, 0x7ABC),
        InputEvent::pointer(20, PointerAction::Pressed, button::RIGHT, 3, 3),
        InputEvent::pointer(25, PointerAction::Released, button::RIGHT, 3, 3),
    ])
    .unwrap();

    let summary = replayer.run(&events, RepeatPolicy::Times(1)).unwrap();
    assert_eq!(summary.translation.unmapped.len(), 1);
    assert_eq!(summary.translation.unmapped[0].code, 0x7ABC);
    assert_eq!(summary.translation.dropped, 2);
    assert_eq!(summary.fired(), 4);

    let right = DeviceCode::Button(Button::Right);
    let presses: Vec<_> = log
        .ops()
        .into_iter()
        .filter(|op| matches!(op, Op::Press(_)))
        .collect();
    assert_eq!(presses, vec![Op::Press(A), Op::Press(right)]);
    assert_balanced(&log);
}

#[test]
fn repeat_three_times_replays_the_list_three_times() {
    let (replayer, log) = replayer();
    let events = EventLog::from_events([
        InputEvent::key(0, KeyAction::Pressed, vc::SPACE),
        InputEvent::key(10, KeyAction::Released, vc::SPACE),
    ])
    .unwrap();

    let summary = replayer.run(&events, RepeatPolicy::Times(3)).unwrap();
    assert_eq!(summary.iterations, 3);
    let space = DeviceCode::Key(Key::Space);
    assert_eq!(
        log.ops(),
        [Op::Press(space), Op::Release(space)].repeat(3)
    );
}

#[test]
fn cancelled_forever_run_stops_and_leaves_nothing_held() {
    let (replayer, log) = replayer();
    let events = EventLog::from_events([
        InputEvent::key(0, KeyAction::Pressed, vc::CONTROL),
        InputEvent::pointer(10, PointerAction::Pressed, button::LEFT, 1, 1),
        InputEvent::key(400, KeyAction::Released, vc::CONTROL),
    ])
    .unwrap();

    let cancel = replayer.cancel_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        cancel.cancel()
    });
    let summary = replayer.run(&events, RepeatPolicy::Forever).unwrap();
    assert!(stopper.join().unwrap());

    assert!(summary.cancelled);
    assert_eq!(summary.iterations, 1);
    assert_balanced(&log);
    let after = log.len();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(log.len(), after);
}

#[test]
fn saved_macro_replays_like_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("typing");
    let events = EventLog::from_events([
        InputEvent::key(0, KeyAction::Pressed, vc::T),
        InputEvent::key(20, KeyAction::Released, vc::T),
        InputEvent::key(40, KeyAction::Pressed, vc::O),
    ])
    .unwrap();
    format::save_file(&path, &events).unwrap();

    let loaded = format::load_file(&path).unwrap();
    assert_eq!(loaded.report.synthesized, 1);

    let (replayer, log) = replayer();
    let summary = replayer.run(&loaded.log, RepeatPolicy::Times(1)).unwrap();
    assert_eq!(summary.fired(), 4);
    assert_eq!(summary.forced_releases(), 0);
    assert_balanced(&log);
}
