use clap::Parser;
use std::path::PathBuf;

/// Process settings; every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "tutord")]
#[command(about = "Tutoring platform sidecar speaking line-delimited JSON on stdin/stdout")]
#[command(version)]
pub struct Config {
    /// Workspace directory to open at startup.
    #[arg(long, env = "TUTORD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log filter, e.g. `info` or `tutord=debug`. Logs go to stderr.
    #[arg(long, env = "TUTORD_LOG", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_without_flags() {
        let cfg = Config::try_parse_from(["tutord"]).expect("parse");
        assert!(!cfg.log_level.is_empty());
    }

    #[test]
    fn flags_override() {
        let cfg = Config::try_parse_from(["tutord", "--workspace", "/tmp/ws", "--log-level", "debug"])
            .expect("parse");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.log_level, "debug");
    }
}
