use std::{io, thread};

/// Blocks forever, no signals are monitored on this platform
pub fn wait_for_signal() -> io::Result<()> {
    loop {
        thread::park();
    }
}
