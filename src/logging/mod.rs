//! Logging facilities

use std::{error::Error, path::Path};

use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Config, Logger, Root},
    encode::pattern::PatternEncoder,
};

use crate::config::LogConfig;

/// Logging initialization error
pub type LoggingError = Box<dyn Error + Send + Sync>;

/// Initialize logger ([log4rs](https://crates.io/crates/log4rs)) from yaml configuration file
pub fn init_with_file<P>(path: P) -> Result<(), LoggingError>
where
    P: AsRef<Path>,
{
    log4rs::init_file(path, Default::default())?;
    Ok(())
}

/// Initialize logger with provided configuration
///
/// `bin_name` and this crate log at `config.level`, everything else at `config.dependency_level`.
pub fn init_with_config(bin_name: &str, config: &LogConfig) -> Result<(), LoggingError> {
    let mut pattern = String::new();
    if !config.without_time {
        pattern += "{d} ";
    }
    pattern += "{h({l}):<5} ";
    if config.level >= LevelFilter::Debug {
        pattern += "[{P}:{I}] [{M}] ";
    }
    pattern += "{m}{n}";

    let logging_builder = Config::builder().appender(
        Appender::builder().build(
            "console",
            Box::new(
                ConsoleAppender::builder()
                    .encoder(Box::new(PatternEncoder::new(&pattern)))
                    .target(Target::Stderr)
                    .build(),
            ),
        ),
    );

    let log_config = logging_builder
        .logger(Logger::builder().build(bin_name, config.level))
        .logger(Logger::builder().build("shadowsocks_nio", config.level))
        .build(Root::builder().appender("console").build(config.dependency_level))?;

    log4rs::init_config(log_config)?;
    Ok(())
}
