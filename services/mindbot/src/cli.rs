use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "mindbot", version, about = "MindBot voice agent worker")]
pub struct Cli {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Chat with the agent in this terminal.
    Console,
    /// Serve WebSocket jobs with debug logging.
    Dev {
        /// Listen address; overrides BIND_ADDRESS.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Serve WebSocket jobs.
    Start {
        /// Listen address; overrides BIND_ADDRESS.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

impl Mode {
    /// `dev` never logs less than DEBUG.
    pub fn log_level(&self, configured: Level) -> Level {
        match self {
            Mode::Dev { .. } => configured.max(Level::DEBUG),
            _ => configured,
        }
    }

    pub fn bind_address(&self, configured: SocketAddr) -> SocketAddr {
        match self {
            Mode::Dev { bind } | Mode::Start { bind } => bind.unwrap_or(configured),
            Mode::Console => configured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        let cli = Cli::try_parse_from(["mindbot", "console"]).unwrap();
        assert_eq!(cli.mode, Mode::Console);

        let cli = Cli::try_parse_from(["mindbot", "start", "--bind", "127.0.0.1:9000"]).unwrap();
        assert_eq!(
            cli.mode,
            Mode::Start {
                bind: Some("127.0.0.1:9000".parse().unwrap())
            }
        );

        assert!(Cli::try_parse_from(["mindbot"]).is_err());
        assert!(Cli::try_parse_from(["mindbot", "dev", "--bind", "nowhere"]).is_err());
    }

    #[test]
    fn test_dev_raises_verbosity() {
        let dev = Mode::Dev { bind: None };
        assert_eq!(dev.log_level(Level::INFO), Level::DEBUG);
        assert_eq!(dev.log_level(Level::TRACE), Level::TRACE);
        assert_eq!(Mode::Console.log_level(Level::WARN), Level::WARN);
    }

    #[test]
    fn test_bind_override() {
        let configured: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        let custom: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert_eq!(Mode::Start { bind: None }.bind_address(configured), configured);
        assert_eq!(Mode::Dev { bind: Some(custom) }.bind_address(configured), custom);
    }
}
