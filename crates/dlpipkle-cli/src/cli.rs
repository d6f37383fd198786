use std::path::PathBuf;

use clap::{ArgAction, Parser};
use dlpipkle_core::{DownloadRequest, TargetSpec};

const AFTER_HELP: &str = "\
Examples:
  dlpipkle requests flask -d ./wheels
  dlpipkle -r requirements.txt --platform manylinux2014_x86_64 --python-version 3.11
  dlpipkle numpy==1.26.4 --list-platforms
  dlpipkle fastapi --print-dep-tree
  dlpipkle requests -e socks --exclude certifi

Environment:
  DLPIPKLE_INDEX_URL     metadata API base (default https://pypi.org/pypi)
  DLPIPKLE_PYTHON        interpreter used to run pip
  DLPIPKLE_HTTP_TIMEOUT  metadata request timeout in seconds
";

#[derive(Parser, Debug)]
#[command(
    name = "dlpipkle",
    version,
    about = "Download Python packages and their whole dependency tree for offline installation.",
    after_help = AFTER_HELP
)]
#[allow(clippy::struct_excessive_bools)]
pub struct DlpipkleCli {
    #[arg(value_name = "PACKAGE", help = "Packages to download, e.g. requests or numpy==1.26.4")]
    pub packages: Vec<String>,
    #[arg(
        short = 'r',
        long = "requirements",
        value_name = "FILE",
        help = "Read additional packages from a requirements file"
    )]
    pub requirements: Option<PathBuf>,
    #[arg(
        short = 'd',
        long = "dest",
        visible_alias = "directory",
        value_name = "DIR",
        default_value = ".",
        help = "Directory to save downloaded packages"
    )]
    pub dest: PathBuf,
    #[arg(long, help = "Download source distributions instead of wheels")]
    pub source: bool,
    #[arg(long, value_name = "TAG", help = "Target platform tag, e.g. win_amd64")]
    pub platform: Option<String>,
    #[arg(long, value_name = "X.Y", help = "Target Python version, e.g. 3.11")]
    pub python_version: Option<String>,
    #[arg(long, value_name = "IMPL", help = "Target Python implementation, e.g. cp")]
    pub implementation: Option<String>,
    #[arg(long, value_name = "TAG", help = "Target ABI tag, e.g. cp311")]
    pub abi: Option<String>,
    #[arg(
        long,
        conflicts_with = "print_dep_tree",
        help = "List the platforms each package publishes distributions for"
    )]
    pub list_platforms: bool,
    #[arg(long, help = "Print the dependency tree without downloading")]
    pub print_dep_tree: bool,
    #[arg(
        short = 'e',
        long = "extra",
        value_name = "NAME",
        action = ArgAction::Append,
        help = "Extra to request for every package (repeatable)"
    )]
    pub extras: Vec<String>,
    #[arg(
        long,
        value_name = "NAME",
        num_args = 1..,
        action = ArgAction::Append,
        help = "Packages to leave out of the download, dependencies included"
    )]
    pub exclude: Vec<String>,
    #[arg(long, value_name = "URL", help = "Package index JSON API base URL")]
    pub index_url: Option<String>,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    pub verbose: u8,
    #[arg(
        short,
        long,
        conflicts_with = "verbose",
        help = "Only log warnings and suppress human output"
    )]
    pub quiet: bool,
    #[arg(long, help = "Emit {status,message,details} JSON")]
    pub json: bool,
    #[arg(long, help = "Disable colored human output")]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Download,
    ListPlatforms,
    DependencyTree,
}

impl DlpipkleCli {
    pub fn mode(&self) -> Mode {
        if self.list_platforms {
            Mode::ListPlatforms
        } else if self.print_dep_tree {
            Mode::DependencyTree
        } else {
            Mode::Download
        }
    }

    pub fn request(&self) -> DownloadRequest {
        DownloadRequest {
            packages: self.packages.clone(),
            requirements_file: self.requirements.clone(),
            dest: self.dest.clone(),
            target: TargetSpec {
                platform: self.platform.clone(),
                python_version: self.python_version.clone(),
                implementation: self.implementation.clone(),
                abi: self.abi.clone(),
                source: self.source,
            },
            extras: self.extras.clone(),
            exclude: self.exclude.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_download_flags() {
        let cli = DlpipkleCli::parse_from([
            "dlpipkle",
            "requests",
            "--directory",
            "out",
            "--platform",
            "win_amd64",
            "--python-version",
            "3.11",
            "-e",
            "socks",
            "-e",
            "security",
            "--exclude",
            "certifi",
            "idna",
        ]);
        assert_eq!(cli.mode(), Mode::Download);
        let request = cli.request();
        assert_eq!(request.packages, ["requests"]);
        assert_eq!(request.dest, PathBuf::from("out"));
        assert_eq!(request.target.platform.as_deref(), Some("win_amd64"));
        assert_eq!(request.extras, ["socks", "security"]);
        assert_eq!(request.exclude, ["certifi", "idna"]);
    }

    #[test]
    fn selects_mode() {
        let cli = DlpipkleCli::parse_from(["dlpipkle", "numpy", "--list-platforms"]);
        assert_eq!(cli.mode(), Mode::ListPlatforms);
        let cli = DlpipkleCli::parse_from(["dlpipkle", "numpy", "--print-dep-tree"]);
        assert_eq!(cli.mode(), Mode::DependencyTree);
        assert!(DlpipkleCli::try_parse_from([
            "dlpipkle",
            "numpy",
            "--print-dep-tree",
            "--list-platforms"
        ])
        .is_err());
    }

    #[test]
    fn defaults_destination_to_current_directory() {
        let cli = DlpipkleCli::parse_from(["dlpipkle", "-r", "reqs.txt", "-vv"]);
        assert_eq!(cli.dest, PathBuf::from("."));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.request().requirements_file, Some(PathBuf::from("reqs.txt")));
    }
}
