use std::time::{Duration, Instant};

use retrace::backends::{Op, VirtualInjector};
use retrace::keycode::{button, vc};
use retrace::{
    format, share, CapturedInput, Connected, KeyAction, PointerAction, Recorder, RepeatPolicy,
    ReplayOptions, Replayer, Settings,
};

fn main() -> retrace::Result<()> {
    // Feed the recorder what a capture hook would see: type "hi", click at (400, 300),
    // then hit the configured stop key.
    let settings = Settings::default();
    let t0 = Instant::now();
    let at = |ms| t0 + Duration::from_millis(ms);
    let (tx, rx) = crossbeam_channel::unbounded();
    for input in [
        CapturedInput::key(KeyAction::Pressed, vc::H, at(0)),
        CapturedInput::key(KeyAction::Released, vc::H, at(60)),
        CapturedInput::key(KeyAction::Pressed, vc::I, at(120)),
        CapturedInput::key(KeyAction::Released, vc::I, at(170)),
        CapturedInput::pointer(PointerAction::Moved, button::NONE, 400, 300, at(200)),
        CapturedInput::pointer(PointerAction::Pressed, button::LEFT, 400, 300, at(260)),
        CapturedInput::pointer(PointerAction::Released, button::LEFT, 400, 300, at(300)),
        CapturedInput::key(KeyAction::Pressed, settings.stop_code()?, at(340)),
    ] {
        let _ = tx.send(input);
    }
    let log = Recorder::new(settings.stop_code()?).record(&rx).log;

    println!("-- saved form --");
    format::write_log(&log, std::io::stdout())?;

    let injector = VirtualInjector::new("virtual:demo");
    let calls = injector.log();
    let replayer = Replayer::new(Connected::new(share(injector)), ReplayOptions::default());
    let summary = replayer.run(&log, RepeatPolicy::Times(2))?;

    println!("-- replayed {} times --", summary.iterations);
    let origin = calls.calls().first().map(|c| c.at);
    for call in calls.calls() {
        let at = origin.map_or(Duration::ZERO, |o| call.at.duration_since(o));
        match call.op {
            Op::Press(code) => println!("{:>6} ms  press   {code}", at.as_millis()),
            Op::Release(code) => println!("{:>6} ms  release {code}", at.as_millis()),
            Op::Move { x, y } => println!("{:>6} ms  move    {x},{y}", at.as_millis()),
        }
    }
    Ok(())
}
