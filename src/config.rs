//! This is a mod for storing and parsing configuration
//!
//! The configuration file is a JSON document in the usual shadowsocks format:
//!
//! ```ignore
//! {
//!     "server": "127.0.0.1",
//!     "server_port": 8388,
//!     "local_address": "127.0.0.1",
//!     "local_port": 1080,
//!     "password": "the-password",
//!     "method": "aes-256-cfb",
//!     "protocol": "auto",
//!     "timeout": 300,
//!     "mode": "nio"
//! }
//! ```
//!
//! Keys written by older Java clients (`remoteIpAddress`, `remotePort`, `localIpAddress`,
//! `localPort`, `proxyType`, `logLevel`) are accepted as well.

use std::{
    fmt::{self, Debug, Display, Formatter},
    fs::{self, OpenOptions},
    io::Read,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

pub use crate::relay::proxy::ProxyType;
use crate::crypto::CipherType;

#[derive(Serialize, Deserialize, Debug, Default)]
struct SSConfig {
    #[serde(skip_serializing_if = "Option::is_none", alias = "remoteIpAddress")]
    server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "remotePort")]
    server_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none", alias = "localIpAddress")]
    local_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "localPort")]
    local_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", alias = "proxyType")]
    protocol: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", alias = "logLevel")]
    log_level: Option<String>,
}

/// Server address
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerAddr {
    /// IP Address
    SocketAddr(SocketAddr),
    /// Domain name address, eg. example.com:8080
    DomainName(String, u16),
}

impl ServerAddr {
    /// Get string representation of domain
    pub fn host(&self) -> String {
        match *self {
            ServerAddr::SocketAddr(ref s) => s.ip().to_string(),
            ServerAddr::DomainName(ref dm, _) => dm.clone(),
        }
    }

    /// Get port
    pub fn port(&self) -> u16 {
        match *self {
            ServerAddr::SocketAddr(ref s) => s.port(),
            ServerAddr::DomainName(_, p) => p,
        }
    }
}

/// Parse `ServerAddr` error
#[derive(Debug)]
pub struct ServerAddrError;

impl Display for ServerAddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid ServerAddr")
    }
}

impl std::error::Error for ServerAddrError {}

impl FromStr for ServerAddr {
    type Err = ServerAddrError;

    fn from_str(s: &str) -> Result<ServerAddr, ServerAddrError> {
        match s.parse::<SocketAddr>() {
            Ok(addr) => Ok(ServerAddr::SocketAddr(addr)),
            Err(..) => {
                let (dn, port) = s.rsplit_once(':').ok_or(ServerAddrError)?;
                if dn.is_empty() {
                    return Err(ServerAddrError);
                }
                match port.parse::<u16>() {
                    Ok(port) => Ok(ServerAddr::DomainName(dn.to_owned(), port)),
                    Err(..) => Err(ServerAddrError),
                }
            }
        }
    }
}

impl Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ServerAddr::SocketAddr(ref a) => write!(f, "{a}"),
            ServerAddr::DomainName(ref d, port) => write!(f, "{d}:{port}"),
        }
    }
}

impl From<SocketAddr> for ServerAddr {
    fn from(addr: SocketAddr) -> ServerAddr {
        ServerAddr::SocketAddr(addr)
    }
}

impl<I: Into<String>> From<(I, u16)> for ServerAddr {
    fn from((dname, port): (I, u16)) -> ServerAddr {
        ServerAddr::DomainName(dname.into(), port)
    }
}

/// How the local server drives its sockets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerMode {
    /// Two non-blocking reactors plus one worker thread per connection
    #[default]
    Nio,
    /// Two blocking threads per connection
    Blocking,
}

/// Parse `ServerMode` error
#[derive(Debug)]
pub struct ServerModeError;

impl Display for ServerModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid ServerMode, expecting \"nio\" or \"blocking\"")
    }
}

impl FromStr for ServerMode {
    type Err = ServerModeError;

    fn from_str(s: &str) -> Result<ServerMode, ServerModeError> {
        match s {
            "nio" => Ok(ServerMode::Nio),
            "blocking" => Ok(ServerMode::Blocking),
            _ => Err(ServerModeError),
        }
    }
}

impl Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ServerMode::Nio => f.write_str("nio"),
            ServerMode::Blocking => f.write_str("blocking"),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Level of this crate and the binary
    pub level: LevelFilter,
    /// Level of every other crate
    pub dependency_level: LevelFilter,
    /// Omit the datetime prefix
    pub without_time: bool,
    /// log4rs YAML file, overrides the other options
    pub config_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            level: LevelFilter::Info,
            dependency_level: LevelFilter::Off,
            without_time: false,
            config_path: None,
        }
    }
}

impl LogConfig {
    /// Applies the number of `-v` flags
    ///
    /// 1 logs this crate at debug, 2 at trace, 3 adds dependencies at debug, 4 traces everything.
    pub fn set_verbosity(&mut self, count: u8) {
        let (level, dependency_level) = match count {
            0 => return,
            1 => (LevelFilter::Debug, LevelFilter::Off),
            2 => (LevelFilter::Trace, LevelFilter::Off),
            3 => (LevelFilter::Trace, LevelFilter::Debug),
            _ => (LevelFilter::Trace, LevelFilter::Trace),
        };
        self.level = level;
        self.dependency_level = dependency_level;
    }
}

/// Level names, `java.util.logging` names included
fn parse_log_level(s: &str) -> Option<LevelFilter> {
    let level = match s.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "severe" | "error" => LevelFilter::Error,
        "warning" | "warn" => LevelFilter::Warn,
        "info" | "config" => LevelFilter::Info,
        "fine" | "debug" => LevelFilter::Debug,
        "finer" | "finest" | "trace" | "all" => LevelFilter::Trace,
        _ => return None,
    };
    Some(level)
}

/// Configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Shadowsocks server
    pub server: Option<ServerAddr>,
    /// Address the local proxy listens on
    pub local_addr: SocketAddr,
    pub password: String,
    pub method: CipherType,
    /// Proxy protocol spoken with local clients
    pub proxy_type: ProxyType,
    /// Idle timeout of relayed sockets
    pub timeout: Option<Duration>,
    pub mode: ServerMode,
    pub log: LogConfig,
    /// Path of the file this configuration was loaded from
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            server: None,
            local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1080),
            password: String::new(),
            method: CipherType::Aes256Cfb,
            proxy_type: ProxyType::default(),
            timeout: None,
            mode: ServerMode::default(),
            log: LogConfig::default(),
            config_path: None,
        }
    }
}

/// Configuration parsing error kind
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing required fields in JSON configuration
    MissingField,
    /// Missing some keys that must be provided together
    Malformed,
    /// Invalid value of some configuration keys
    Invalid,
    /// Invalid JSON
    JsonParsingError,
    /// `std::io::Error`
    IoError,
}

/// Configuration parsing error
pub struct Error {
    pub kind: ErrorKind,
    pub desc: &'static str,
    pub detail: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, desc: &'static str, detail: Option<String>) -> Error {
        Error { kind, desc, detail }
    }
}

macro_rules! impl_from {
    ($error:ty, $kind:expr, $desc:expr) => {
        impl From<$error> for Error {
            fn from(err: $error) -> Self {
                Error::new($kind, $desc, Some(format!("{}", err)))
            }
        }
    };
}

impl_from!(::std::io::Error, ErrorKind::IoError, "error while reading file");
impl_from!(serde_json::Error, ErrorKind::JsonParsingError, "json parse error");

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.detail {
            None => write!(f, "{}", self.desc),
            Some(ref det) => write!(f, "{} {}", self.desc, det),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.detail {
            None => f.write_str(self.desc),
            Some(ref d) => write!(f, "{}, {}", self.desc, d),
        }
    }
}

impl std::error::Error for Error {}

impl Config {
    fn load_from_ssconfig(config: SSConfig) -> Result<Config, Error> {
        let mut nconfig = Config::default();

        match (config.server, config.server_port) {
            (Some(addr), Some(port)) => {
                let addr = match addr.parse::<IpAddr>() {
                    Ok(ip) => ServerAddr::from(SocketAddr::new(ip, port)),
                    Err(..) => ServerAddr::from((addr, port)),
                };
                nconfig.server = Some(addr);
            }
            (None, None) => {}
            _ => {
                let err = Error::new(
                    ErrorKind::Malformed,
                    "`server` and `server_port` must be provided together",
                    None,
                );
                return Err(err);
            }
        }

        let local_ip = match config.local_address {
            Some(addr) => match addr.parse::<IpAddr>() {
                Ok(ip) => ip,
                Err(..) => {
                    let err = Error::new(ErrorKind::Invalid, "invalid `local_address`", Some(addr));
                    return Err(err);
                }
            },
            None => nconfig.local_addr.ip(),
        };
        let local_port = config.local_port.unwrap_or(nconfig.local_addr.port());
        nconfig.local_addr = SocketAddr::new(local_ip, local_port);

        if let Some(password) = config.password {
            nconfig.password = password;
        }

        if let Some(method) = config.method {
            nconfig.method = match method.parse::<CipherType>() {
                Ok(m) => m,
                Err(..) => {
                    let err = Error::new(ErrorKind::Invalid, "unsupported method", Some(method));
                    return Err(err);
                }
            };
        }

        if let Some(protocol) = config.protocol {
            nconfig.proxy_type = match protocol.parse::<ProxyType>() {
                Ok(p) => p,
                Err(..) => {
                    let err = Error::new(ErrorKind::Invalid, "invalid `protocol`", Some(protocol));
                    return Err(err);
                }
            };
        }

        if let Some(timeout) = config.timeout {
            nconfig.timeout = Some(Duration::from_secs(timeout));
        }

        if let Some(mode) = config.mode {
            nconfig.mode = match mode.parse::<ServerMode>() {
                Ok(m) => m,
                Err(..) => {
                    let err = Error::new(ErrorKind::Invalid, "invalid `mode`", Some(mode));
                    return Err(err);
                }
            };
        }

        if let Some(level) = config.log_level {
            nconfig.log.level = match parse_log_level(&level) {
                Some(l) => l,
                None => {
                    let err = Error::new(ErrorKind::Invalid, "invalid `log_level`", Some(level));
                    return Err(err);
                }
            };
        }

        Ok(nconfig)
    }

    /// Load Config from a `str`
    pub fn load_from_str(s: &str) -> Result<Config, Error> {
        let c = serde_json::from_str::<SSConfig>(s)?;
        Config::load_from_ssconfig(c)
    }

    /// Load Config from a File
    pub fn load_from_file<P: AsRef<Path>>(filename: P) -> Result<Config, Error> {
        let filename = filename.as_ref();

        let mut reader = OpenOptions::new().read(true).open(filename)?;
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let mut config = Config::load_from_str(&content[..])?;
        config.config_path = Some(filename.to_owned());

        Ok(config)
    }

    /// Serializes to the JSON document `load_from_str` accepts
    pub fn to_json_string(&self) -> Result<String, Error> {
        let ssconfig = SSConfig {
            server: self.server.as_ref().map(ServerAddr::host),
            server_port: self.server.as_ref().map(ServerAddr::port),
            local_address: Some(self.local_addr.ip().to_string()),
            local_port: Some(self.local_addr.port()),
            password: Some(self.password.clone()),
            method: Some(self.method.name().to_owned()),
            protocol: Some(self.proxy_type.name().to_owned()),
            timeout: self.timeout.map(|t| t.as_secs()),
            mode: Some(self.mode.to_string()),
            log_level: Some(self.log.level.to_string().to_ascii_lowercase()),
        };
        Ok(serde_json::to_string_pretty(&ssconfig)?)
    }

    /// Writes `to_json_string` into `filename`
    pub fn save_to_file<P: AsRef<Path>>(&self, filename: P) -> Result<(), Error> {
        let json = self.to_json_string()?;
        fs::write(filename, json)?;
        Ok(())
    }

    /// Check if all required fields are already set
    pub fn check_integrity(&self) -> Result<(), Error> {
        let server = match self.server {
            Some(ref s) => s,
            None => {
                let err = Error::new(ErrorKind::MissingField, "missing `server` and `server_port`", None);
                return Err(err);
            }
        };

        if server.port() == 0 {
            let err = Error::new(ErrorKind::Invalid, "`server_port` must not be 0", None);
            return Err(err);
        }

        if self.password.is_empty() {
            let err = Error::new(ErrorKind::MissingField, "missing `password`", None);
            return Err(err);
        }

        if let Some(timeout) = self.timeout {
            if timeout.as_secs() == 0 {
                let err = Error::new(ErrorKind::Invalid, "`timeout` must be > 0", None);
                return Err(err);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_load_standard_keys() {
        let config = Config::load_from_str(
            r#"{
                "server": "127.0.0.1",
                "server_port": 8388,
                "local_address": "0.0.0.0",
                "local_port": 1081,
                "password": "secret",
                "method": "chacha20-ietf",
                "protocol": "auto",
                "timeout": 300,
                "mode": "blocking",
                "log_level": "debug"
            }"#,
        )
        .unwrap();

        assert_eq!(config.server, Some("127.0.0.1:8388".parse().unwrap()));
        assert_eq!(config.local_addr, "0.0.0.0:1081".parse::<SocketAddr>().unwrap());
        assert_eq!(config.password, "secret");
        assert_eq!(config.method, CipherType::ChaCha20Ietf);
        assert_eq!(config.proxy_type, ProxyType::Auto);
        assert_eq!(config.timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.mode, ServerMode::Blocking);
        assert_eq!(config.log.level, LevelFilter::Debug);
        config.check_integrity().unwrap();
    }

    #[test]
    fn test_load_legacy_keys() {
        let config = Config::load_from_str(
            r#"{
                "remoteIpAddress": "example.com",
                "remotePort": 443,
                "localIpAddress": "127.0.0.1",
                "localPort": 7070,
                "password": "secret",
                "method": "rc4-md5",
                "proxyType": "HTTP",
                "logLevel": "INFO"
            }"#,
        )
        .unwrap();

        assert_eq!(config.server, Some(ServerAddr::DomainName("example.com".to_owned(), 443)));
        assert_eq!(config.local_addr.port(), 7070);
        assert_eq!(config.method, CipherType::Rc4Md5);
        assert_eq!(config.proxy_type, ProxyType::Http);
        assert_eq!(config.log.level, LevelFilter::Info);
    }

    #[test]
    fn test_defaults() {
        let config = Config::load_from_str("{}").unwrap();
        assert_eq!(config.local_addr, "127.0.0.1:1080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.method, CipherType::Aes256Cfb);
        assert_eq!(config.proxy_type, ProxyType::Socks5);
        assert_eq!(config.mode, ServerMode::Nio);
        assert_eq!(config.timeout, None);

        let err = config.check_integrity().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingField);
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::load_from_str(r#"{"method": "aes-256-gcm"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
        assert_eq!(err.to_string(), "unsupported method, aes-256-gcm");

        let err = Config::load_from_str(r#"{"server": "127.0.0.1"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Malformed);

        let err = Config::load_from_str(r#"{"protocol": "socks4"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);

        let err = Config::load_from_str("{ not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::JsonParsingError);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = Config::default();
        config.server = Some(ServerAddr::DomainName("example.com".to_owned(), 8388));
        config.password = "secret".to_owned();
        config.method = CipherType::BfCfb;
        config.proxy_type = ProxyType::Http;
        config.timeout = Some(Duration::from_secs(60));
        config.mode = ServerMode::Blocking;
        config.log.level = LevelFilter::Warn;

        let json = config.to_json_string().unwrap();
        let loaded = Config::load_from_str(&json).unwrap();

        assert_eq!(loaded.server, config.server);
        assert_eq!(loaded.local_addr, config.local_addr);
        assert_eq!(loaded.password, config.password);
        assert_eq!(loaded.method, config.method);
        assert_eq!(loaded.proxy_type, config.proxy_type);
        assert_eq!(loaded.timeout, config.timeout);
        assert_eq!(loaded.mode, config.mode);
        assert_eq!(loaded.log.level, LevelFilter::Warn);
    }

    #[test]
    fn test_log_level_names() {
        for (name, level) in [
            ("OFF", LevelFilter::Off),
            ("SEVERE", LevelFilter::Error),
            ("WARNING", LevelFilter::Warn),
            ("CONFIG", LevelFilter::Info),
            ("FINE", LevelFilter::Debug),
            ("FINER", LevelFilter::Trace),
            ("FINEST", LevelFilter::Trace),
            ("ALL", LevelFilter::Trace),
            ("warn", LevelFilter::Warn),
        ] {
            let config = Config::load_from_str(&format!(r#"{{"logLevel": "{name}"}}"#)).unwrap();
            assert_eq!(config.log.level, level, "{name}");
        }

        let err = Config::load_from_str(r#"{"log_level": "loud"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Invalid);
    }

    #[test]
    fn test_log_verbosity() {
        let mut log = LogConfig::default();
        log.set_verbosity(0);
        assert_eq!((log.level, log.dependency_level), (LevelFilter::Info, LevelFilter::Off));
        log.set_verbosity(1);
        assert_eq!((log.level, log.dependency_level), (LevelFilter::Debug, LevelFilter::Off));
        log.set_verbosity(3);
        assert_eq!((log.level, log.dependency_level), (LevelFilter::Trace, LevelFilter::Debug));
        log.set_verbosity(9);
        assert_eq!((log.level, log.dependency_level), (LevelFilter::Trace, LevelFilter::Trace));
    }

    #[test]
    fn test_server_addr_parse() {
        assert_eq!(
            "[::1]:8388".parse::<ServerAddr>().unwrap(),
            ServerAddr::SocketAddr("[::1]:8388".parse().unwrap())
        );
        assert_eq!(
            "example.com:80".parse::<ServerAddr>().unwrap(),
            ServerAddr::DomainName("example.com".to_owned(), 80)
        );
        assert!("example.com".parse::<ServerAddr>().is_err());
        assert!(":80".parse::<ServerAddr>().is_err());
    }
}
