//! Local server launchers

use std::{
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::{error, info, trace};

#[cfg(feature = "logging")]
use crate::logging;
use crate::{
    config::{Config, ProxyType, ServerAddr, ServerMode},
    crypto::{available_ciphers, CipherType},
    monitor,
    relay::{blocking::BlockingLocalServer, local::LocalServer},
    vparser,
};

/// Defines command line options
pub fn define_command_line_options(mut app: Command) -> Command {
    app = app
        .arg(
            Arg::new("CONFIG")
                .short('c')
                .long("config")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath)
                .help("Shadowsocks configuration file (https://shadowsocks.org/guide/configs.html)"),
        )
        .arg(
            Arg::new("LOCAL_ADDR")
                .short('b')
                .long("local-addr")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(vparser::parse_socket_addr)
                .help("Local address, listen only to this address if specified"),
        )
        .arg(
            Arg::new("SERVER_ADDR")
                .short('s')
                .long("server-addr")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(vparser::parse_server_addr)
                .help("Server address"),
        )
        .arg(
            Arg::new("PASSWORD")
                .short('k')
                .long("password")
                .num_args(1)
                .action(ArgAction::Set)
                .help("Server's password"),
        )
        .arg(
            Arg::new("ENCRYPT_METHOD")
                .short('m')
                .long("encrypt-method")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(PossibleValuesParser::new(available_ciphers()))
                .help("Server's encryption method"),
        )
        .arg(
            Arg::new("PROTOCOL")
                .long("protocol")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(vparser::parse_proxy_type)
                .help("Protocol for communicating with clients: socks5, http or auto (SOCKS5 by default)"),
        )
        .arg(
            Arg::new("TIMEOUT")
                .long("timeout")
                .num_args(1)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(u64))
                .help("Idle timeout seconds of relayed connections"),
        )
        .arg(
            Arg::new("BLOCKING")
                .long("blocking")
                .action(ArgAction::SetTrue)
                .help("Relay with blocking sockets, two threads per connection"),
        );

    #[cfg(feature = "logging")]
    {
        app = app
            .arg(
                Arg::new("VERBOSE")
                    .short('v')
                    .action(ArgAction::Count)
                    .help("Set log level"),
            )
            .arg(
                Arg::new("LOG_WITHOUT_TIME")
                    .long("log-without-time")
                    .action(ArgAction::SetTrue)
                    .help("Log without datetime prefix"),
            )
            .arg(
                Arg::new("LOG_CONFIG")
                    .long("log-config")
                    .num_args(1)
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(PathBuf))
                    .value_hint(ValueHint::FilePath)
                    .help("log4rs configuration file"),
            );
    }

    app
}

/// Applies command line options on top of `config`
fn set_options(config: &mut Config, matches: &ArgMatches) {
    if let Some(svr_addr) = matches.get_one::<ServerAddr>("SERVER_ADDR").cloned() {
        config.server = Some(svr_addr);
    }

    if let Some(password) = matches.get_one::<String>("PASSWORD") {
        config.password = password.clone();
    }

    if let Some(method) = matches
        .get_one::<String>("ENCRYPT_METHOD")
        .and_then(|m| m.parse::<CipherType>().ok())
    {
        config.method = method;
    }

    if let Some(local_addr) = matches.get_one::<SocketAddr>("LOCAL_ADDR") {
        config.local_addr = *local_addr;
    }

    if let Some(proxy_type) = matches.get_one::<ProxyType>("PROTOCOL") {
        config.proxy_type = *proxy_type;
    }

    if let Some(timeout) = matches.get_one::<u64>("TIMEOUT") {
        config.timeout = Some(Duration::from_secs(*timeout));
    }

    if matches.get_flag("BLOCKING") {
        config.mode = ServerMode::Blocking;
    }

    #[cfg(feature = "logging")]
    {
        config.log.set_verbosity(matches.get_count("VERBOSE"));
        if matches.get_flag("LOG_WITHOUT_TIME") {
            config.log.without_time = true;
        }
        if let Some(path) = matches.get_one::<PathBuf>("LOG_CONFIG") {
            config.log.config_path = Some(path.clone());
        }
    }
}

/// Program entrance `main`
pub fn main(matches: &ArgMatches) -> ExitCode {
    let mut config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(config_path) => match Config::load_from_file(config_path) {
            Ok(c) => c,
            Err(err) => {
                eprintln!("loading config {config_path:?}, {err}");
                return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
            }
        },
        None => Config::default(),
    };
    set_options(&mut config, matches);

    #[cfg(feature = "logging")]
    {
        let result = match config.log.config_path {
            Some(ref path) => logging::init_with_file(path),
            None => logging::init_with_config("sslocal", &config.log),
        };
        if let Err(err) = result {
            eprintln!("failed to initialize logging, {err}");
            return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
        }
    }

    trace!("{:?}", config);

    if config.server.is_none() {
        eprintln!(
            "missing `server`, consider specifying it by --server-addr command line option, \
                or \"server\" and \"server_port\" in configuration file"
        );
        return crate::EXIT_CODE_INSUFFICIENT_PARAMS.into();
    }

    if let Err(err) = config.check_integrity() {
        eprintln!("config integrity check failed, {err}");
        return crate::EXIT_CODE_LOAD_CONFIG_FAILURE.into();
    }

    info!("shadowsocks local {} ({} mode)", crate::VERSION, config.mode);

    match config.mode {
        ServerMode::Nio => run_nio(&config),
        ServerMode::Blocking => run_blocking(&config),
    }
}

/// Runs `on_signal` on a background thread after SIGINT or SIGTERM
fn spawn_signal_monitor<F>(on_signal: F) -> Arc<AtomicBool>
where
    F: FnOnce() + Send + 'static,
{
    let signaled = Arc::new(AtomicBool::new(false));
    let flag = signaled.clone();

    let spawned = thread::Builder::new()
        .name("signal-monitor".to_owned())
        .spawn(move || match monitor::wait_for_signal() {
            Ok(()) => {
                flag.store(true, Ordering::Release);
                on_signal();
            }
            Err(err) => error!("failed to monitor signals, {}", err),
        });

    if let Err(err) = spawned {
        error!("failed to start signal monitor, {}", err);
    }

    signaled
}

fn run_nio(config: &Config) -> ExitCode {
    let handle = match LocalServer::new(config).and_then(LocalServer::spawn) {
        Ok(h) => h,
        Err(err) => {
            eprintln!("failed to start local server, {err}");
            return crate::EXIT_CODE_SERVER_ABORTED.into();
        }
    };

    let trigger = handle.shutdown_trigger();
    let signaled = spawn_signal_monitor(move || trigger.shutdown());

    match handle.join() {
        Ok(()) if signaled.load(Ordering::Acquire) => ExitCode::SUCCESS,
        Ok(()) => {
            eprintln!("server exited unexpectedly");
            crate::EXIT_CODE_SERVER_EXIT_UNEXPECTEDLY.into()
        }
        Err(err) => {
            eprintln!("server aborted with {err}");
            crate::EXIT_CODE_SERVER_ABORTED.into()
        }
    }
}

fn run_blocking(config: &Config) -> ExitCode {
    let server = match BlockingLocalServer::new(config) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("failed to start local server, {err}");
            return crate::EXIT_CODE_SERVER_ABORTED.into();
        }
    };

    // Either the server returns or a signal arrives, whichever is first decides the exit code
    let (tx, rx) = crossbeam_channel::bounded(2);

    let signal_tx = tx.clone();
    spawn_signal_monitor(move || {
        let _ = signal_tx.send(None);
    });

    let spawned = thread::Builder::new()
        .name("blocking-server".to_owned())
        .spawn(move || {
            let _ = tx.send(Some(server.run()));
        });
    if let Err(err) = spawned {
        eprintln!("failed to start local server, {err}");
        return crate::EXIT_CODE_SERVER_ABORTED.into();
    }

    match rx.recv() {
        Ok(None) | Err(..) => ExitCode::SUCCESS,
        Ok(Some(Ok(()))) => {
            eprintln!("server exited unexpectedly");
            crate::EXIT_CODE_SERVER_EXIT_UNEXPECTEDLY.into()
        }
        Ok(Some(Err(err))) => {
            eprintln!("server aborted with {err}");
            crate::EXIT_CODE_SERVER_ABORTED.into()
        }
    }
}
