//! INI-based configuration, mirroring the legacy daemon's section layout.

use std::path::Path;
use std::path::PathBuf;

use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalConfig {
    pub logging_config: Option<String>,
    pub control_host: String,
    pub control_port: u16,
    pub owner: String,
    pub private_key: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub trackers: Vec<String>,
    pub user: Option<String>,
    pub auth: Option<String>,
    pub fetch_interval_secs: u64,
    pub fetch_peers: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitConfig {
    pub path: PathBuf,
    pub publish_method: String,
    pub daemon_port: u16,
    pub repo_url: Option<String>,
    pub export_timeout_hours: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub export_timeout_hours: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub global: GlobalConfig,
    pub peer: PeerConfig,
    pub git: GitConfig,
    pub database: DatabaseConfig,
}

fn require<'a>(section: &'a ini::Properties, section_name: &str, key: &str) -> Result<&'a str, Error> {
    return section
        .get(key)
        .ok_or_else(|| Error::Config(format!("missing [{}] {}", section_name, key)));
}

fn parse_num<T: std::str::FromStr>(section_name: &str, key: &str, raw: &str) -> Result<T, Error> {
    return raw
        .parse::<T>()
        .map_err(|_| Error::Config(format!("[{}] {} is not a valid number: '{}'", section_name, key, raw)));
}

impl Config {
    /// Load a configuration file, applying the same section/key defaults as
    /// the legacy `ConfigParser`-based daemon.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, Error> {
        let ini = ini::Ini::load_from_file(path.as_ref())
            .map_err(|e| Error::Config(format!("could not read config file: {}", e)))?;

        let global_section = ini
            .section(Some("GLOBAL"))
            .ok_or_else(|| Error::Config("missing [GLOBAL] section".to_string()))?;
        let global = GlobalConfig {
            logging_config: global_section.get("logging_config").map(str::to_string),
            control_host: global_section.get("control_host").unwrap_or("127.0.0.1").to_string(),
            control_port: global_section
                .get("control_port")
                .map(|v| parse_num("GLOBAL", "control_port", v))
                .transpose()?
                .unwrap_or(44880),
            owner: require(global_section, "GLOBAL", "owner")?.to_string(),
            private_key: PathBuf::from(require(global_section, "GLOBAL", "private_key")?),
        };

        let peer_section = ini.section(Some("PEER")).ok_or_else(|| Error::Config("missing [PEER] section".to_string()))?;
        let peer = PeerConfig {
            trackers: peer_section
                .get("trackers")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            user: peer_section.get("user").map(str::to_string),
            auth: peer_section.get("auth").map(str::to_string),
            fetch_interval_secs: peer_section
                .get("fetch_interval")
                .map(|v| parse_num("PEER", "fetch_interval", v))
                .transpose()?
                .unwrap_or(120),
            fetch_peers: peer_section
                .get("fetch_peers")
                .map(|v| parse_num("PEER", "fetch_peers", v))
                .transpose()?
                .unwrap_or(3),
        };

        let git_section = ini.section(Some("GIT")).ok_or_else(|| Error::Config("missing [GIT] section".to_string()))?;
        let git = GitConfig {
            path: PathBuf::from(require(git_section, "GIT", "path")?),
            publish_method: git_section.get("publish_method").unwrap_or("daemon").to_string(),
            daemon_port: git_section
                .get("daemon_port")
                .map(|v| parse_num("GIT", "daemon_port", v))
                .transpose()?
                .unwrap_or(11223),
            repo_url: git_section.get("repo_url").map(str::to_string),
            export_timeout_hours: git_section
                .get("export_timeout")
                .map(|v| parse_num("GIT", "export_timeout", v))
                .transpose()?
                .unwrap_or(96),
        };

        let database_section = ini
            .section(Some("DATABASE"))
            .ok_or_else(|| Error::Config("missing [DATABASE] section".to_string()))?;
        let database = DatabaseConfig {
            path: PathBuf::from(require(database_section, "DATABASE", "path")?),
            export_timeout_hours: database_section
                .get("export_timeout")
                .map(|v| parse_num("DATABASE", "export_timeout", v))
                .transpose()?
                .unwrap_or(96),
        };

        return Ok(Config { global, peer, git, database });
    }
}
