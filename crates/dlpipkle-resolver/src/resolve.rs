use std::collections::{BTreeMap, BTreeSet, VecDeque};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metadata::{MetadataError, MetadataSource, PackageMetadata};
use crate::name::normalize;
use crate::platform::TargetSpec;
use crate::requirement::Requirement;
use crate::select::select_version;

#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub roots: Vec<Requirement>,
    /// Names never added to the result, however many packages depend on them.
    pub exclude: BTreeSet<String>,
    /// Requested extras keyed by package name.
    pub extras: BTreeMap<String, Vec<String>>,
    pub target: TargetSpec,
}

/// A package selected for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPackage {
    pub requirement: Requirement,
    pub version: String,
    pub root: bool,
    /// sha256 digests of the selected version's files, keyed by filename.
    pub digests: BTreeMap<String, String>,
}

impl ResolvedPackage {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.requirement.normalized
    }

    /// Requirement string handed to the download command, pinned to the
    /// selected version.
    #[must_use]
    pub fn download_spec(&self) -> String {
        format!(
            "{}{}=={}",
            self.requirement.normalized,
            self.requirement.extras_suffix(),
            self.version
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    NotFound,
    Network,
    MalformedMetadata,
    MalformedInput,
    NoMatchingVersion,
    PinnedVersionMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionWarning {
    pub package: String,
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    /// Root names in the order they were requested.
    pub roots: Vec<String>,
    /// Resolved packages keyed by normalized name, in discovery order.
    pub packages: IndexMap<String, ResolvedPackage>,
    /// Dependencies discovered for each resolved package.
    pub edges: IndexMap<String, Vec<String>>,
    pub warnings: Vec<ResolutionWarning>,
    #[serde(skip)]
    excluded: BTreeSet<String>,
}

impl Resolution {
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(&normalize(name))
    }

    /// Packages sorted by normalized name.
    #[must_use]
    pub fn sorted(&self) -> Vec<&ResolvedPackage> {
        let mut packages: Vec<&ResolvedPackage> = self.packages.values().collect();
        packages.sort_by(|a, b| a.name().cmp(b.name()));
        packages
    }

    /// Requested roots that did not make it into the result (excluded roots
    /// are not failures).
    #[must_use]
    pub fn unresolved_roots(&self) -> Vec<&str> {
        self.roots
            .iter()
            .filter(|root| !self.contains(root) && !self.excluded.contains(*root))
            .map(String::as_str)
            .collect()
    }

    fn warn(&mut self, package: &str, kind: WarningKind, message: String) {
        warn!(package, ?kind, "{message}");
        self.warnings.push(ResolutionWarning {
            package: package.to_string(),
            kind,
            message,
        });
    }

    fn record_metadata_error(&mut self, package: &str, err: &MetadataError) {
        let kind = match err {
            MetadataError::NotFound { .. } => WarningKind::NotFound,
            MetadataError::Network { .. } => WarningKind::Network,
            MetadataError::Malformed { .. } => WarningKind::MalformedMetadata,
        };
        self.warn(package, kind, err.to_string());
    }
}

struct QueueItem {
    requirement: Requirement,
    root: bool,
}

struct NodeMetadata {
    version: String,
    requires_dist: Vec<String>,
    digests: BTreeMap<String, String>,
}

/// Walk the dependency graph breadth-first from `request.roots`.
///
/// Markers are never evaluated, so conditional and extra-gated dependencies
/// are always followed. A lookup failure prunes that node only.
pub fn resolve(source: &dyn MetadataSource, request: &ResolveRequest) -> Resolution {
    let exclude: BTreeSet<String> = request.exclude.iter().map(|name| normalize(name)).collect();
    let extras: BTreeMap<String, &Vec<String>> = request
        .extras
        .iter()
        .map(|(name, extras)| (normalize(name), extras))
        .collect();

    let mut resolution = Resolution {
        excluded: exclude.clone(),
        ..Resolution::default()
    };
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<QueueItem> = VecDeque::new();
    for root in &request.roots {
        if !resolution.roots.contains(&root.normalized) {
            resolution.roots.push(root.normalized.clone());
        }
        queue.push_back(QueueItem {
            requirement: root.clone(),
            root: true,
        });
    }

    while let Some(QueueItem {
        mut requirement,
        root,
    }) = queue.pop_front()
    {
        let name = requirement.normalized.clone();
        if exclude.contains(&name) {
            debug!(package = %name, "excluded");
            continue;
        }
        if !visited.insert(name.clone()) {
            continue;
        }
        if let Some(requested) = extras.get(&name) {
            requirement.add_extras(requested.iter());
        }

        let Some(node) = resolve_node(source, &requirement, &request.target, &mut resolution)
        else {
            continue;
        };
        info!(package = %name, version = %node.version, "resolved");

        let mut children: Vec<String> = Vec::new();
        for raw in &node.requires_dist {
            let child = match Requirement::parse(raw) {
                Ok(child) => child,
                Err(err) => {
                    resolution.warn(&name, WarningKind::MalformedInput, err.to_string());
                    continue;
                }
            };
            if exclude.contains(&child.normalized) || child.normalized == name {
                continue;
            }
            if !children.contains(&child.normalized) {
                children.push(child.normalized.clone());
            }
            if !visited.contains(&child.normalized) {
                queue.push_back(QueueItem {
                    requirement: child,
                    root: false,
                });
            }
        }

        resolution.edges.insert(name.clone(), children);
        resolution.packages.insert(
            name,
            ResolvedPackage {
                requirement,
                version: node.version,
                root,
                digests: node.digests,
            },
        );
    }

    resolution
}

fn resolve_node(
    source: &dyn MetadataSource,
    requirement: &Requirement,
    target: &TargetSpec,
    resolution: &mut Resolution,
) -> Option<NodeMetadata> {
    let name = requirement.normalized.as_str();
    let specifiers = match requirement.version_specifiers() {
        Ok(specifiers) => specifiers,
        Err(err) => {
            resolution.warn(name, WarningKind::MalformedInput, err.to_string());
            return None;
        }
    };

    if let Some(pinned) = requirement.pinned_version() {
        match source.fetch_metadata(name, Some(&pinned)) {
            Ok(metadata) => return Some(node_from(&metadata, metadata.version.clone())),
            Err(MetadataError::NotFound { .. }) => {
                resolution.warn(
                    name,
                    WarningKind::PinnedVersionMissing,
                    format!("version {pinned} of `{name}` was not found; reading dependencies from the latest release"),
                );
                return match source.fetch_metadata(name, None) {
                    Ok(latest) => Some(NodeMetadata {
                        version: pinned,
                        ..node_from(&latest, latest.version.clone())
                    }),
                    Err(err) => {
                        resolution.record_metadata_error(name, &err);
                        None
                    }
                };
            }
            Err(err) => {
                resolution.record_metadata_error(name, &err);
                return None;
            }
        }
    }

    let metadata = match source.fetch_metadata(name, None) {
        Ok(metadata) => metadata,
        Err(err) => {
            resolution.record_metadata_error(name, &err);
            return None;
        }
    };
    let Some(selected) = select_version(&metadata, &specifiers, target) else {
        resolution.warn(
            name,
            WarningKind::NoMatchingVersion,
            format!("no release of `{name}` satisfies `{requirement}`"),
        );
        return None;
    };
    if selected == metadata.version {
        return Some(node_from(&metadata, selected));
    }

    debug!(package = name, version = %selected, "fetching metadata for selected version");
    match source.fetch_metadata(name, Some(&selected)) {
        Ok(versioned) => Some(NodeMetadata {
            digests: digests_for(&metadata, &selected)
                .into_iter()
                .chain(digests_for(&versioned, &selected))
                .collect(),
            ..node_from(&versioned, selected)
        }),
        Err(err) => {
            resolution.record_metadata_error(name, &err);
            None
        }
    }
}

fn node_from(metadata: &PackageMetadata, version: String) -> NodeMetadata {
    NodeMetadata {
        digests: digests_for(metadata, &version),
        requires_dist: metadata.requires_dist.clone(),
        version,
    }
}

fn digests_for(metadata: &PackageMetadata, version: &str) -> BTreeMap<String, String> {
    metadata
        .distributions_for(version)
        .iter()
        .filter_map(|record| {
            record
                .sha256
                .as_ref()
                .map(|digest| (record.filename.clone(), digest.clone()))
        })
        .collect()
}
