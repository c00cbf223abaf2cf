use std::io;

use log::info;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

/// Blocks until `SIGTERM` or `SIGINT` is received
pub fn wait_for_signal() -> io::Result<()> {
    let mut signals = Signals::new([SIGTERM, SIGINT])?;

    let signal_name = match signals.forever().next() {
        Some(SIGTERM) => "SIGTERM",
        Some(SIGINT) => "SIGINT",
        _ => "signal",
    };

    info!("received {}, exiting", signal_name);

    Ok(())
}
