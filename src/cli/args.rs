use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Dynamically configured HTTP(S) reverse proxy.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub(crate) struct Args {
    /// YAML settings file
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    pub(crate) http: Option<SocketAddr>,

    /// HTTPS listen address
    #[arg(long)]
    pub(crate) https: Option<SocketAddr>,

    /// Control API listen address
    #[arg(long)]
    pub(crate) control: Option<SocketAddr>,

    /// Password sealing certificate material at rest
    #[arg(long, env = "GANTRY_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,

    /// YAML file with the initial configuration
    #[arg(short, long)]
    pub(crate) bootstrap: Option<PathBuf>,

    /// Key prefix of the configuration layout
    #[arg(long)]
    pub(crate) prefix: Option<String>,

    /// Capacity of the configuration action queue
    #[arg(long)]
    pub(crate) queue_capacity: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "gantry",
            "--http",
            "127.0.0.1:8080",
            "--control",
            "127.0.0.1:9000",
            "-b",
            "bootstrap.yaml",
            "--queue-capacity",
            "8",
        ])
        .unwrap();

        assert_eq!(args.http, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(args.bootstrap, Some(PathBuf::from("bootstrap.yaml")));
        assert_eq!(args.queue_capacity, Some(8));
        assert!(args.config.is_none());
    }

    #[test]
    fn rejects_bad_address() {
        assert!(Args::try_parse_from(["gantry", "--http", ":80"]).is_err());
    }
}
