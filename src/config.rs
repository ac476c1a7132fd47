//! Settings shared by every subcommand.
//!
//! Each flag can also come from a `DOCMIRROR_*` environment variable, which is
//! how the daemon is usually configured under a service manager.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::index::DEFAULT_URL_PREFIX;
use crate::sync::SyncError;
use crate::types::BranchName;

/// Default seconds between scheduled sync passes.
pub const DEFAULT_INTERVAL_SECS: u64 = 5 * 60;

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// URL of the repository to mirror
    #[arg(long, env = "DOCMIRROR_REMOTE")]
    pub remote: Option<String>,

    /// Where the working tree lives
    #[arg(long, env = "DOCMIRROR_PATH", default_value_os_t = default_mirror_path())]
    pub mirror: PathBuf,

    /// Branch to follow
    #[arg(long, env = "DOCMIRROR_BRANCH", default_value = "main")]
    pub branch: BranchName,

    /// Directory inside the mirror holding the documents
    #[arg(long, env = "DOCMIRROR_DOC_ROOT", default_value = "")]
    pub doc_root: String,

    /// URL prefix documents are served under
    #[arg(long, env = "DOCMIRROR_URL_PREFIX", default_value = DEFAULT_URL_PREFIX)]
    pub url_prefix: String,

    /// Seconds between sync passes when running as a daemon
    #[arg(
        long = "interval",
        env = "DOCMIRROR_INTERVAL_SECS",
        default_value_t = DEFAULT_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval_secs: u64,

    /// git executable used for clone and fetch
    #[arg(long, env = "DOCMIRROR_GIT", default_value = "git")]
    pub git: String,
}

impl Config {
    /// The configured remote, or an error naming how to set it.
    pub fn remote(&self) -> Result<&str, SyncError> {
        self.remote.as_deref().filter(|r| !r.is_empty()).ok_or_else(|| {
            SyncError::InvalidInput(
                "no remote configured (pass --remote or set DOCMIRROR_REMOTE)".to_string(),
            )
        })
    }

    /// Directory the indexer walks: the document root inside the mirror.
    pub fn doc_root_path(&self) -> PathBuf {
        let relative = self.doc_root.trim_start_matches('/');
        if relative.is_empty() {
            self.mirror.clone()
        } else {
            self.mirror.join(relative)
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// `<cache dir>/docmirror/mirror`, falling back to the working directory.
pub fn default_mirror_path() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("docmirror"))
        .unwrap_or_else(|| PathBuf::from(".docmirror"))
        .join("mirror")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        let argv = std::iter::once("docmirror").chain(args.iter().copied());
        TestCli::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--remote",
            "https://git.example.com/acme/api-docs.git",
            "--mirror",
            "/srv/docs",
            "--branch",
            "release/v2",
            "--doc-root",
            "api",
            "--url-prefix",
            "/docs",
            "--interval",
            "30",
        ]);

        assert_eq!(
            config.remote().unwrap(),
            "https://git.example.com/acme/api-docs.git"
        );
        assert_eq!(config.branch.as_str(), "release/v2");
        assert_eq!(config.doc_root_path(), PathBuf::from("/srv/docs/api"));
        assert_eq!(config.url_prefix, "/docs");
        assert_eq!(config.interval(), Duration::from_secs(30));
    }

    #[test]
    fn doc_root_defaults_to_mirror() {
        let config = parse(&["--mirror", "/srv/docs"]);
        assert_eq!(config.doc_root_path(), PathBuf::from("/srv/docs"));

        let config = parse(&["--mirror", "/srv/docs", "--doc-root", "/api/v1"]);
        assert_eq!(config.doc_root_path(), PathBuf::from("/srv/docs/api/v1"));
    }

    #[test]
    fn invalid_branch_is_rejected() {
        let argv = ["docmirror", "--branch", "bad..name"];
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let argv = ["docmirror", "--interval", "0"];
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn missing_remote_is_invalid_input() {
        let config = Config {
            remote: None,
            ..parse(&[])
        };
        let err = config.remote().unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[test]
    fn default_mirror_ends_in_docmirror() {
        assert!(default_mirror_path().ends_with("docmirror/mirror"));
    }
}
