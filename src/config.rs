//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Operator console and session server for remote muster agents
#[derive(Parser, Debug, Clone)]
#[command(name = "muster-server", version, about)]
pub struct ServerConfig {
    /// Address to listen on for agent connections
    #[arg(long, env = "MUSTER_LISTEN", default_value = "0.0.0.0:4040")]
    pub listen: SocketAddr,

    /// Directory where retrieved files are written
    #[arg(long, env = "MUSTER_DOWNLOAD_DIR", default_value = ".")]
    pub download_dir: PathBuf,

    /// How long to collect responses after a dispatch, in milliseconds
    #[arg(long, default_value_t = muster_shared::timing::RESPONSE_WINDOW_MS)]
    pub response_window_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["muster-server"]).expect("parse");
        assert_eq!(config.listen.port(), 4040);
        assert_eq!(config.download_dir, PathBuf::from("."));
        assert_eq!(config.response_window_ms, 2000);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::try_parse_from([
            "muster-server",
            "--listen",
            "127.0.0.1:9999",
            "--download-dir",
            "/tmp/loot",
            "--response-window-ms",
            "500",
        ])
        .expect("parse");
        assert_eq!(config.listen.port(), 9999);
        assert_eq!(config.download_dir, PathBuf::from("/tmp/loot"));
        assert_eq!(config.response_window_ms, 500);
    }
}
