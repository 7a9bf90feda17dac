//! Injection capability seam.
//!
//! An [`Injector`] is the opaque "press / release / move" primitive the schedulers drive.
//! Backends live in [`crate::backends`]. Schedulers never construct injectors themselves;
//! they acquire a shared handle through an [`InjectorSource`], which is where an
//! unavailable display or session surfaces as an error.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::InjectError;
use crate::event::Channel;
use crate::keycode::DeviceCode;

/// Synthetic input primitive.
pub trait Injector: Send {
    fn press(&mut self, code: DeviceCode) -> Result<(), InjectError>;
    fn release(&mut self, code: DeviceCode) -> Result<(), InjectError>;
    /// Move the cursor to absolute screen coordinates.
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), InjectError>;
    fn name(&self) -> &str;
}

/// Injector shared between a scheduler's worker and the cleanup path.
pub type SharedInjector = Arc<Mutex<Box<dyn Injector>>>;

/// Wrap a concrete injector for sharing.
pub fn share(injector: impl Injector + 'static) -> SharedInjector {
    Arc::new(Mutex::new(Box::new(injector)))
}

/// Hands out injectors to schedulers, one acquisition per scheduler construction.
pub trait InjectorSource: Send + Sync {
    fn acquire(&self, channel: Channel) -> Result<SharedInjector, InjectError>;
}

/// Source backed by one injector connected at process start.
///
/// Every channel gets the same handle; calls from the two channel workers serialize on
/// its lock.
#[derive(Clone)]
pub struct Connected(SharedInjector);

impl Connected {
    pub fn new(injector: SharedInjector) -> Self {
        Self(injector)
    }

    pub fn injector(&self) -> &SharedInjector {
        &self.0
    }
}

impl InjectorSource for Connected {
    fn acquire(&self, _channel: Channel) -> Result<SharedInjector, InjectError> {
        Ok(Arc::clone(&self.0))
    }
}
