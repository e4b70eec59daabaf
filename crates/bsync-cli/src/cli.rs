use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "bsync",
    about = "Synchronize every branch of every project between two replicas",
    version
)]
pub struct Cli {
    /// Local root holding the projects
    #[arg(value_name = "LOCAL", default_value = ".")]
    pub local: PathBuf,

    /// Projects to sync (default: every directory under either root)
    #[arg(value_name = "PROJECT")]
    pub projects: Vec<String>,

    /// Remote location name from the config file (e.g. work, home)
    #[arg(short, long)]
    pub location: Option<String>,

    /// Remote root path or URL, overriding the location's configured root
    #[arg(short, long)]
    pub remote_root: Option<String>,

    /// Report what would happen without writing anything
    #[arg(short, long)]
    pub dry_run: bool,

    /// Config file (default: $BSYNC_CONFIG)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    #[arg(short, long)]
    pub verbose: bool,

    /// Skip the up-front fetch of the sync remote
    #[arg(long)]
    pub no_prefetch: bool,

    /// Copy other configured remotes between the two replicas
    #[arg(long)]
    pub mirror_remotes: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["bsync"]).unwrap();
        assert_eq!(cli.local, PathBuf::from("."));
        assert!(cli.projects.is_empty());
        assert!(cli.location.is_none());
        assert!(!cli.dry_run);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn parse_local_and_projects() {
        let cli = Cli::try_parse_from(["bsync", "~/src", "alpha", "beta"]).unwrap();
        assert_eq!(cli.local, PathBuf::from("~/src"));
        assert_eq!(cli.projects, vec!["alpha", "beta"]);
    }

    #[test]
    fn parse_location_and_dry_run() {
        let cli = Cli::try_parse_from(["bsync", "-l", "home", "-d"]).unwrap();
        assert_eq!(cli.location.as_deref(), Some("home"));
        assert!(cli.dry_run);
    }

    #[test]
    fn parse_remote_root() {
        let cli = Cli::try_parse_from(["bsync", "--remote-root", "/mnt/usb", "."]).unwrap();
        assert_eq!(cli.remote_root.as_deref(), Some("/mnt/usb"));
        let short = Cli::try_parse_from(["bsync", "-r", "/mnt/usb"]).unwrap();
        assert_eq!(short.remote_root.as_deref(), Some("/mnt/usb"));
    }

    #[test]
    fn parse_sync_toggles() {
        let cli = Cli::try_parse_from(["bsync", "--no-prefetch", "--mirror-remotes"]).unwrap();
        assert!(cli.no_prefetch);
        assert!(cli.mirror_remotes);
    }

    #[test]
    fn parse_json_format_and_config() {
        let cli =
            Cli::try_parse_from(["bsync", "--format", "json", "-c", "bsync.toml", "-v"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("bsync.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn reject_unknown_format() {
        assert!(Cli::try_parse_from(["bsync", "--format", "yaml"]).is_err());
    }
}
