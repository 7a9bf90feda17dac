//! Keyboard and mouse macro recording and timed replay.
//!
//! A recording is an [`EventLog`]: per-channel (keyboard, pointer) lists of events
//! stamped with their offset from the first captured event. Replaying it means firing
//! every event at `start + offset`, on both channels at once, as many times as asked,
//! without ever leaving a key or button pressed.
//!
//! ```no_run
//! use retrace::{backends, Connected, MacroLibrary, Replayer, RepeatPolicy, Settings};
//!
//! # fn main() -> retrace::Result<()> {
//! let settings = Settings::default();
//! let library = MacroLibrary::open(&settings.macro_dir)?;
//! let loaded = library.load("login")?;
//!
//! let (injector, _) = backends::connect(settings.injector)?;
//! let replayer = Replayer::new(Connected::new(injector), settings.replay_options());
//! let summary = replayer.run(&loaded.log, RepeatPolicy::Times(3))?;
//! println!("{} events fired", summary.fired());
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod format;
pub mod held;
pub mod keycode;
pub mod library;
pub mod orchestrator;
pub mod recorder;
pub mod scheduler;
pub mod shutdown;
pub mod translate;

pub use config::Settings;
pub use device::*;
pub use error::{Error, InjectError, Result};
pub use event::*;
pub use format::{LoadReport, Loaded};
pub use library::MacroLibrary;
pub use orchestrator::{
    CancelHandle, IterationReport, RepeatPolicy, ReplayOptions, ReplaySummary, Replayer,
};
pub use recorder::{CapturedInput, Recorder, Recording, StopReason};
pub use scheduler::{ChannelReport, ChannelScheduler, SchedulerOptions, SchedulerState};
pub use translate::{translate, Translation, TranslationReport};
