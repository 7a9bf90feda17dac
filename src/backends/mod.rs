//! Injection backends for `retrace`.
//!
//! Implementations of [`Injector`](crate::device::Injector).
//!
//! # Feature flags
//! - **`enigo`**: OS-level injection through `enigo` (default).
//!
//! The [`virtual_input`] backend is always compiled; it records calls instead of
//! injecting them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::device::{share, SharedInjector};
use crate::error::InjectError;

#[cfg(feature = "enigo")]
#[cfg_attr(docsrs, doc(cfg(feature = "enigo")))]
pub mod native;
pub mod virtual_input;

pub use virtual_input::{InjectedCall, Op, VirtualInjector, VirtualLog};

/// Which backend to connect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Real OS injection.
    #[default]
    Enigo,
    /// Record calls only.
    Virtual,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Enigo => f.write_str("enigo"),
            BackendKind::Virtual => f.write_str("virtual"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enigo" => Ok(BackendKind::Enigo),
            "virtual" => Ok(BackendKind::Virtual),
            other => Err(format!("unknown injector backend `{other}`")),
        }
    }
}

/// Connect the chosen backend. Called once at process start.
///
/// For [`BackendKind::Virtual`] the returned [`VirtualLog`] lets the caller inspect what
/// would have been injected.
pub fn connect(kind: BackendKind) -> Result<(SharedInjector, Option<VirtualLog>), InjectError> {
    match kind {
        BackendKind::Virtual => {
            let injector = VirtualInjector::new("virtual:0");
            let log = injector.log();
            info!("using virtual injector (dry run)");
            Ok((share(injector), Some(log)))
        }
        BackendKind::Enigo => connect_enigo().map(|inj| (inj, None)),
    }
}

#[cfg(feature = "enigo")]
fn connect_enigo() -> Result<SharedInjector, InjectError> {
    let injector = native::EnigoInjector::connect()?;
    info!("connected enigo injector");
    Ok(share(injector))
}

#[cfg(not(feature = "enigo"))]
fn connect_enigo() -> Result<SharedInjector, InjectError> {
    Err(InjectError::Unavailable(
        "built without the `enigo` feature".to_string(),
    ))
}
