#![deny(clippy::all, warnings)]

//! Command implementations behind the `dlpipkle` CLI: gather the requested
//! packages, resolve their dependency closure, and fetch every distribution
//! into one directory.

mod config;
mod download;
mod net;
mod outcome;
mod process;
mod requirements;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use dlpipkle_resolver::{
    categorize_platforms, compatibility, current_platform, render_tree, resolve, MetadataSource,
    PypiJsonClient, Requirement, Resolution, ResolveRequest,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub use config::{Config, DownloadConfig, IndexConfig, NetworkConfig};
pub use dlpipkle_resolver::TargetSpec;
pub use download::{
    download_all, Attempt, CommandRunner, DownloadResult, DownloadSummary, FetchCommand,
    SystemRunner,
};
pub use outcome::{CommandStatus, ExecutionOutcome, InputError};
pub use process::{run_command, RunOutput};
pub use requirements::{
    parse_requirement_args, parse_requirement_lines, read_requirements_file, InputWarning,
    ParsedRequirements,
};

/// Side-effecting services the commands depend on.
pub trait Effects {
    fn metadata(&self) -> &dyn MetadataSource;
    fn runner(&self) -> &dyn CommandRunner;
    /// Command used to fetch distributions.
    ///
    /// # Errors
    /// Returns an error when no usable interpreter is available.
    fn fetch_command(&self) -> Result<FetchCommand>;
}

pub struct SystemEffects {
    client: PypiJsonClient,
    runner: SystemRunner,
    python: Option<String>,
}

impl SystemEffects {
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: PypiJsonClient::new(&config.client_options())?,
            runner: SystemRunner::new(config.network().keep_proxies),
            python: config.download().python.clone(),
        })
    }
}

impl Effects for SystemEffects {
    fn metadata(&self) -> &dyn MetadataSource {
        &self.client
    }

    fn runner(&self) -> &dyn CommandRunner {
        &self.runner
    }

    fn fetch_command(&self) -> Result<FetchCommand> {
        let python = dlpipkle_python::detect_interpreter(self.python.as_deref())?;
        Ok(FetchCommand::pip(python))
    }
}

/// What the user asked for, shared by every command.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub packages: Vec<String>,
    pub requirements_file: Option<PathBuf>,
    pub dest: PathBuf,
    pub target: TargetSpec,
    /// Extras applied to every requested package.
    pub extras: Vec<String>,
    /// Package names to leave out of the closure entirely.
    pub exclude: Vec<String>,
}

impl Default for DownloadRequest {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            requirements_file: None,
            dest: PathBuf::from("."),
            target: TargetSpec::default(),
            extras: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Resolve the requested packages and download every distribution into
/// `request.dest`.
///
/// # Errors
/// Only unexpected internal failures are returned as errors; bad input and
/// failed packages are reported through the outcome.
pub fn download(effects: &dyn Effects, request: &DownloadRequest) -> Result<ExecutionOutcome> {
    let roots = match collect_roots(request) {
        Ok(roots) => roots,
        Err(err) => return Ok(err.into_outcome()),
    };
    let dest = match prepare_destination(&request.dest) {
        Ok(dest) => dest,
        Err(err) => return Ok(err.into_outcome()),
    };
    let command = match effects.fetch_command() {
        Ok(command) => command,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                format!("{err:#}"),
                json!({ "hint": "set DLPIPKLE_PYTHON to an interpreter with pip installed" }),
            ))
        }
    };

    if request.target.source && request.target.has_constraints() {
        warn!("platform and interpreter constraints are ignored when downloading sources");
    }

    let resolution = resolve_roots(effects, request, roots.requirements);
    let packages = resolution.sorted();
    info!(count = packages.len(), dest = %dest.display(), "resolved packages");
    let summary = download_all(effects.runner(), &command, &packages, &dest, &request.target);

    let unresolved = resolution.unresolved_roots();
    let failed: Vec<&str> = summary
        .results
        .iter()
        .filter(|result| !result.succeeded)
        .map(|result| result.name.as_str())
        .collect();
    let details = json!({
        "dest": dest,
        "target": request.target,
        "packages": package_rows(&resolution),
        "downloads": summary.results,
        "unresolved": unresolved,
        "failed": failed,
        "warnings": warnings_json(&roots.warnings, &resolution),
    });

    let downloaded = summary.succeeded().len();
    if !unresolved.is_empty() || !failed.is_empty() {
        let mut problems = Vec::new();
        if !unresolved.is_empty() {
            problems.push(format!("could not resolve {}", unresolved.join(", ")));
        }
        if !failed.is_empty() {
            problems.push(format!("{downloaded} downloaded, {} failed", failed.len()));
        }
        return Ok(ExecutionOutcome::failure(problems.join("; "), details));
    }
    let message = if downloaded == 0 {
        "nothing to download".to_string()
    } else {
        format!("downloaded {downloaded} packages to {}", dest.display())
    };
    Ok(ExecutionOutcome::success(message, details))
}

/// Resolve the requested packages and render their dependency tree without
/// downloading anything.
///
/// # Errors
/// Only unexpected internal failures are returned as errors.
pub fn dependency_tree(effects: &dyn Effects, request: &DownloadRequest) -> Result<ExecutionOutcome> {
    let roots = match collect_roots(request) {
        Ok(roots) => roots,
        Err(err) => return Ok(err.into_outcome()),
    };
    let resolution = resolve_roots(effects, request, roots.requirements);
    let unresolved = resolution.unresolved_roots();
    let details = json!({
        "tree": render_tree(&resolution),
        "packages": package_rows(&resolution),
        "edges": resolution.edges,
        "unresolved": unresolved,
        "warnings": warnings_json(&roots.warnings, &resolution),
    });
    if unresolved.is_empty() {
        Ok(ExecutionOutcome::success(
            format!("resolved {} packages", resolution.packages.len()),
            details,
        ))
    } else {
        Ok(ExecutionOutcome::failure(
            format!("could not resolve {}", unresolved.join(", ")),
            details,
        ))
    }
}

/// Report the platform tags each requested package publishes distributions
/// for. A pinned requirement inspects that version, otherwise the latest.
///
/// # Errors
/// Only unexpected internal failures are returned as errors.
pub fn list_platforms(effects: &dyn Effects, request: &DownloadRequest) -> Result<ExecutionOutcome> {
    let roots = match collect_roots(request) {
        Ok(roots) => roots,
        Err(err) => return Ok(err.into_outcome()),
    };

    let current = current_platform();
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for requirement in &roots.requirements {
        let version = requirement.pinned_version();
        debug!(package = %requirement.normalized, version = ?version, "listing platforms");
        match dlpipkle_resolver::list_platforms(
            effects.metadata(),
            &requirement.normalized,
            version.as_deref(),
        ) {
            Ok(platforms) => {
                let groups: Vec<Value> = categorize_platforms(&platforms)
                    .into_iter()
                    .map(|(family, tags)| json!({ "family": family.to_string(), "platforms": tags }))
                    .collect();
                entries.push(json!({
                    "name": requirement.normalized,
                    "version": version,
                    "platforms": platforms,
                    "groups": groups,
                    "compatibility": compatibility(&platforms, &current),
                }));
            }
            Err(err) => {
                warn!(package = %requirement.normalized, "{err}");
                errors.push(requirement.normalized.clone());
                entries.push(json!({
                    "name": requirement.normalized,
                    "version": version,
                    "error": err.to_string(),
                }));
            }
        }
    }

    let details = json!({
        "current": current,
        "packages": entries,
        "warnings": roots.warnings,
    });
    if errors.is_empty() {
        Ok(ExecutionOutcome::success(
            format!("listed platforms for {} packages", roots.requirements.len()),
            details,
        ))
    } else {
        Ok(ExecutionOutcome::failure(
            format!("could not list platforms for {}", errors.join(", ")),
            details,
        ))
    }
}

fn collect_roots(request: &DownloadRequest) -> Result<ParsedRequirements, InputError> {
    let mut roots = parse_requirement_args(&request.packages);
    if let Some(path) = &request.requirements_file {
        let from_file = read_requirements_file(path).map_err(|err| {
            InputError::new(
                format!("{err:#}"),
                json!({ "requirements_file": path }),
            )
        })?;
        roots.extend(from_file);
    }
    if roots.requirements.is_empty() {
        return Err(InputError::new(
            "no packages specified",
            json!({
                "hint": "pass package names or --requirements <file>",
                "warnings": roots.warnings,
            }),
        ));
    }
    for requirement in &mut roots.requirements {
        requirement.add_extras(&request.extras);
    }
    Ok(roots)
}

fn prepare_destination(dest: &Path) -> Result<PathBuf, InputError> {
    fs::create_dir_all(dest).map_err(|err| {
        InputError::new(
            format!("cannot create destination {}: {err}", dest.display()),
            json!({ "dest": dest }),
        )
    })?;
    fs::canonicalize(dest).map_err(|err| {
        InputError::new(
            format!("cannot resolve destination {}: {err}", dest.display()),
            json!({ "dest": dest }),
        )
    })
}

fn resolve_roots(
    effects: &dyn Effects,
    request: &DownloadRequest,
    roots: Vec<Requirement>,
) -> Resolution {
    let resolve_request = ResolveRequest {
        roots,
        exclude: request.exclude.iter().cloned().collect::<BTreeSet<_>>(),
        target: request.target.clone(),
        ..ResolveRequest::default()
    };
    resolve(effects.metadata(), &resolve_request)
}

fn package_rows(resolution: &Resolution) -> Vec<Value> {
    resolution
        .sorted()
        .into_iter()
        .map(|package| {
            json!({
                "name": package.name(),
                "version": package.version,
                "root": package.root,
                "requirement": package.download_spec(),
            })
        })
        .collect()
}

fn warnings_json(input: &[InputWarning], resolution: &Resolution) -> Value {
    json!({
        "input": input,
        "resolution": resolution.warnings,
    })
}
