//! Signal monitor

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use self::unix::wait_for_signal;
    } else {
        mod other;
        pub use self::other::wait_for_signal;
    }
}
