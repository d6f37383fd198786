use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use dlpipkle_resolver::{ResolvedPackage, TargetSpec};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::process::{self, RunOutput};

/// Runs external commands. Swapped for a fake in tests.
pub trait CommandRunner {
    /// Run `program` with `args` in `cwd`.
    ///
    /// # Errors
    /// Returns an error when the program cannot be started.
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<RunOutput>;
}

/// Runs commands on the host. Proxy variables are stripped from the child
/// environment unless `keep_proxies` is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner {
    pub keep_proxies: bool,
}

impl SystemRunner {
    #[must_use]
    pub fn new(keep_proxies: bool) -> Self {
        Self { keep_proxies }
    }

    fn environment(&self) -> Vec<(String, String)> {
        let mut envs = vec![
            ("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string()),
            ("PIP_NO_INPUT".to_string(), "1".to_string()),
        ];
        if !self.keep_proxies {
            envs.extend(
                process::PROXY_VARS
                    .iter()
                    .map(|key| ((*key).to_string(), String::new())),
            );
        }
        envs
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<RunOutput> {
        process::run_command(program, args, &self.environment(), cwd)
    }
}

/// How to start the package fetcher, e.g. `python3 -m pip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCommand {
    pub program: String,
    pub prefix: Vec<String>,
}

impl FetchCommand {
    #[must_use]
    pub fn pip(python: impl Into<String>) -> Self {
        Self {
            program: python.into(),
            prefix: dlpipkle_python::pip_prefix(),
        }
    }

    /// Arguments for downloading exactly one distribution of `spec` into
    /// `dest` without its dependencies.
    #[must_use]
    pub fn download_args(&self, dest: &Path, target: &TargetSpec, spec: &str) -> Vec<String> {
        let mut args = self.prefix.clone();
        args.extend(
            ["download", "--no-deps", "--dest"]
                .into_iter()
                .map(String::from),
        );
        args.push(dest.display().to_string());
        if target.source {
            args.extend(["--no-binary", ":all:"].into_iter().map(String::from));
        } else if target.has_constraints() {
            args.extend(["--only-binary", ":all:"].into_iter().map(String::from));
            let flags = [
                ("--platform", &target.platform),
                ("--python-version", &target.python_version),
                ("--implementation", &target.implementation),
                ("--abi", &target.abi),
            ];
            for (flag, value) in flags {
                if let Some(value) = value {
                    args.push(flag.to_string());
                    args.push(value.clone());
                }
            }
        }
        args.push(spec.to_string());
        args
    }

    fn render(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attempt {
    /// With the requested platform constraints.
    Primary,
    /// Retried without platform constraints after the primary attempt failed.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    pub name: String,
    pub requirement: String,
    pub succeeded: bool,
    pub attempt: Attempt,
    /// Every command line tried, in order.
    pub commands: Vec<String>,
    pub exit_code: Option<i32>,
    pub artifacts: Vec<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadSummary {
    pub dest: PathBuf,
    pub results: Vec<DownloadResult>,
}

impl DownloadSummary {
    #[must_use]
    pub fn succeeded(&self) -> Vec<&DownloadResult> {
        self.results.iter().filter(|result| result.succeeded).collect()
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&DownloadResult> {
        self.results.iter().filter(|result| !result.succeeded).collect()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| result.succeeded)
    }
}

/// Download every package independently. One package failing never stops
/// the others; results come back sorted by normalized name.
pub fn download_all(
    runner: &dyn CommandRunner,
    command: &FetchCommand,
    packages: &[&ResolvedPackage],
    dest: &Path,
    target: &TargetSpec,
) -> DownloadSummary {
    let mut ordered: Vec<&ResolvedPackage> = packages.to_vec();
    ordered.sort_by(|a, b| a.name().cmp(b.name()));

    let total = ordered.len();
    let mut results = Vec::with_capacity(total);
    for (index, package) in ordered.into_iter().enumerate() {
        info!(
            package = package.name(),
            version = %package.version,
            "downloading [{}/{total}]",
            index + 1
        );
        let result = download_one(runner, command, package, dest, target);
        if let Some(error) = &result.error {
            warn!(package = %result.name, "download failed: {error}");
        }
        results.push(result);
    }
    DownloadSummary {
        dest: dest.to_path_buf(),
        results,
    }
}

struct AttemptFailure {
    exit_code: Option<i32>,
    message: String,
}

fn download_one(
    runner: &dyn CommandRunner,
    command: &FetchCommand,
    package: &ResolvedPackage,
    dest: &Path,
    target: &TargetSpec,
) -> DownloadResult {
    let spec = package.download_spec();
    let mut result = DownloadResult {
        name: package.name().to_string(),
        requirement: spec.clone(),
        succeeded: false,
        attempt: Attempt::Primary,
        commands: Vec::new(),
        exit_code: None,
        artifacts: Vec::new(),
        error: None,
    };

    let mut outcome = run_attempt(runner, command, dest, target, &spec, &mut result);
    let constrained = !target.source && target.has_constraints();
    if let Err(failure) = &outcome {
        if constrained && failure.exit_code.is_some() {
            warn!(
                package = %result.name,
                "no distribution for the requested platform, retrying without constraints"
            );
            result.attempt = Attempt::Fallback;
            outcome = run_attempt(
                runner,
                command,
                dest,
                &target.unconstrained(),
                &spec,
                &mut result,
            );
        }
    }

    match outcome.and_then(|artifacts| {
        verify_artifacts(&artifacts, &package.digests).map(|()| artifacts)
    }) {
        Ok(artifacts) => {
            result.succeeded = true;
            result.artifacts = artifacts;
        }
        Err(failure) => {
            result.error = Some(failure.message);
        }
    }
    result
}

fn run_attempt(
    runner: &dyn CommandRunner,
    command: &FetchCommand,
    dest: &Path,
    target: &TargetSpec,
    spec: &str,
    result: &mut DownloadResult,
) -> Result<Vec<PathBuf>, AttemptFailure> {
    let args = command.download_args(dest, target, spec);
    let rendered = command.render(&args);
    debug!(command = %rendered, "invoking fetcher");
    result.commands.push(rendered);

    let before = list_files(dest);
    let output = match runner.run(&command.program, &args, dest) {
        Ok(output) => output,
        Err(err) => {
            result.exit_code = None;
            return Err(AttemptFailure {
                exit_code: None,
                message: format!("{err:#}"),
            });
        }
    };
    result.exit_code = Some(output.code);
    if !output.success() {
        return Err(AttemptFailure {
            exit_code: Some(output.code),
            message: failure_message(&output),
        });
    }

    let after = list_files(dest);
    let mut artifacts: Vec<PathBuf> = after.difference(&before).cloned().collect();
    if artifacts.is_empty() {
        artifacts = reported_artifacts(&output.stdout, dest);
    }
    Ok(artifacts)
}

fn failure_message(output: &RunOutput) -> String {
    let stderr = output.stderr.trim();
    let error_line = stderr
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()));
    match error_line {
        Some(line) => format!("exit status {}: {}", output.code, line.trim()),
        None => format!("exit status {}", output.code),
    }
}

fn list_files(dir: &Path) -> BTreeSet<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return BTreeSet::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect()
}

// pip reports reused files as `File was already downloaded <path>` and new
// ones as `Saved <path>`; nothing new shows up in the directory for the former.
fn reported_artifacts(stdout: &str, dest: &Path) -> Vec<PathBuf> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("Saved ")
                .or_else(|| line.strip_prefix("File was already downloaded "))
        })
        .map(|path| {
            let path = Path::new(path.trim());
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                dest.join(path)
            }
        })
        .collect()
}

fn verify_artifacts(
    artifacts: &[PathBuf],
    digests: &BTreeMap<String, String>,
) -> Result<(), AttemptFailure> {
    for artifact in artifacts {
        let Some(expected) = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| digests.get(name))
        else {
            continue;
        };
        let actual = sha256_file(artifact).map_err(|err| AttemptFailure {
            exit_code: None,
            message: format!("failed to hash {}: {err}", artifact.display()),
        })?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(AttemptFailure {
                exit_code: None,
                message: format!(
                    "sha256 mismatch for {}: expected {expected}, got {actual}",
                    artifact.display()
                ),
            });
        }
        debug!(artifact = %artifact.display(), "sha256 verified");
    }
    Ok(())
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
