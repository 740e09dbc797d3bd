//! The companion-firmware link: wire framing, transports, the reconnecting
//! worker task, and a typed facade over its RPCs.

pub mod facade;
pub mod protocol;
pub mod transport;
pub mod worker;

pub use facade::ModemFacade;

use crate::config::ModemConfig;

/// Brings up a modem connection and returns a ready-to-use facade. The
/// worker keeps reconnecting in the background for the lifetime of the
/// returned handle.
pub fn connect(config: ModemConfig) -> ModemFacade {
    ModemFacade::new(worker::spawn(config))
}
