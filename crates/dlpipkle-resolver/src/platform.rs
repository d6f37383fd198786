use std::{collections::BTreeMap, collections::BTreeSet, fmt};

use serde::Serialize;

use crate::metadata::{DistributionKind, DistributionRecord, MetadataError, MetadataSource};

/// Pseudo platform tag reported when a source distribution is available.
pub const SOURCE_PLATFORM: &str = "source";

/// Target platform/interpreter constraints for a download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetSpec {
    pub platform: Option<String>,
    pub python_version: Option<String>,
    pub implementation: Option<String>,
    pub abi: Option<String>,
    /// Download source distributions instead of wheels.
    pub source: bool,
}

impl TargetSpec {
    #[must_use]
    pub fn has_constraints(&self) -> bool {
        self.platform.is_some()
            || self.python_version.is_some()
            || self.implementation.is_some()
            || self.abi.is_some()
    }

    /// The same target with every platform/interpreter constraint dropped.
    #[must_use]
    pub fn unconstrained(&self) -> Self {
        Self {
            source: self.source,
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid wheel filename: {filename}")]
pub struct InvalidFilename {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelTags {
    pub python: Vec<String>,
    pub abi: Vec<String>,
    pub platform: Vec<String>,
}

/// Split `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl` into its
/// (dot-compressed) tag sets.
///
/// # Errors
/// Returns `InvalidFilename` when the name is not a wheel or lacks tag fields.
pub fn parse_wheel_filename(filename: &str) -> Result<WheelTags, InvalidFilename> {
    let invalid = || InvalidFilename {
        filename: filename.to_string(),
    };
    let lower = filename.to_ascii_lowercase();
    if !lower.ends_with(".whl") {
        return Err(invalid());
    }
    let trimmed = &filename[..filename.len() - ".whl".len()];
    let parts: Vec<&str> = trimmed.split('-').collect();
    if parts.len() < 5 || parts.iter().any(|part| part.is_empty()) {
        return Err(invalid());
    }
    let split = |value: &str| value.split('.').map(str::to_string).collect::<Vec<_>>();
    Ok(WheelTags {
        python: split(parts[parts.len() - 3]),
        abi: split(parts[parts.len() - 2]),
        platform: split(parts[parts.len() - 1]),
    })
}

/// Whether a distribution satisfies the target constraints. An absent
/// constraint matches anything.
#[must_use]
pub fn matches(record: &DistributionRecord, target: &TargetSpec) -> bool {
    match record.kind {
        DistributionKind::Other => false,
        DistributionKind::Source => {
            target.source || (target.platform.is_none() && target.abi.is_none())
        }
        DistributionKind::Wheel => {
            if target.source {
                return false;
            }
            let abi3 = record
                .abi_tags
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case("abi3"));
            let python_ok = record.python_tags.iter().any(|tag| {
                python_tag_matches(
                    tag,
                    target.python_version.as_deref(),
                    target.implementation.as_deref(),
                    abi3,
                )
            });
            let abi_ok = match target.abi.as_deref() {
                None => true,
                Some(abi) => record.abi_tags.iter().any(|tag| abi_tag_matches(tag, abi)),
            };
            let platform_ok = match target.platform.as_deref() {
                None => true,
                Some(platform) => record.platform_tags.iter().any(|tag| {
                    tag.eq_ignore_ascii_case(platform) || tag.eq_ignore_ascii_case("any")
                }),
            };
            python_ok && abi_ok && platform_ok
        }
    }
}

fn python_tag_matches(
    tag: &str,
    python_version: Option<&str>,
    implementation: Option<&str>,
    abi3: bool,
) -> bool {
    let split_at = tag
        .find(|ch: char| ch.is_ascii_digit())
        .unwrap_or(tag.len());
    let (interpreter, digits) = tag.split_at(split_at);
    let interpreter = interpreter.to_ascii_lowercase();

    if let Some(implementation) = implementation {
        let wanted = implementation.to_ascii_lowercase();
        if interpreter != "py" && interpreter != wanted {
            return false;
        }
    }

    let Some(requested) = python_version else {
        return true;
    };
    let requested: String = requested.chars().filter(char::is_ascii_digit).collect();
    let (Some(req_major), Some(tag_major)) = (requested.chars().next(), digits.chars().next())
    else {
        return false;
    };
    if req_major != tag_major {
        return false;
    }
    let tag_minor = &digits[1..];
    let req_minor = &requested[1..];
    if tag_minor.is_empty() || tag_minor == req_minor {
        return true;
    }
    // cp37-abi3 wheels load on every later CPython 3.x.
    match (tag_minor.parse::<u32>(), req_minor.parse::<u32>()) {
        (Ok(tag_minor), Ok(req_minor)) => abi3 && interpreter == "cp" && tag_minor <= req_minor,
        _ => false,
    }
}

fn abi_tag_matches(tag: &str, requested: &str) -> bool {
    tag.eq_ignore_ascii_case(requested)
        || tag.eq_ignore_ascii_case("none")
        || (tag.eq_ignore_ascii_case("abi3") && requested.to_ascii_lowercase().starts_with("cp3"))
}

/// Distinct platform tags published for a package version; `source` stands
/// in for source distributions.
///
/// # Errors
/// Propagates metadata lookup failures.
pub fn list_platforms(
    source: &dyn MetadataSource,
    name: &str,
    version: Option<&str>,
) -> Result<BTreeSet<String>, MetadataError> {
    let metadata = source.fetch_metadata(name, version)?;
    let selected = version.unwrap_or(&metadata.version);
    Ok(platforms_of(metadata.distributions_for(selected)))
}

#[must_use]
pub fn platforms_of(records: &[DistributionRecord]) -> BTreeSet<String> {
    let mut platforms = BTreeSet::new();
    for record in records {
        match record.kind {
            DistributionKind::Wheel => platforms.extend(record.platform_tags.iter().cloned()),
            DistributionKind::Source => {
                platforms.insert(SOURCE_PLATFORM.to_string());
            }
            DistributionKind::Other => {}
        }
    }
    platforms
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PlatformFamily {
    Windows,
    #[serde(rename = "macOS")]
    MacOs,
    Linux,
    Other,
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Windows => "Windows",
            Self::MacOs => "macOS",
            Self::Linux => "Linux",
            Self::Other => "Other",
        };
        f.write_str(label)
    }
}

#[must_use]
pub fn platform_family(tag: &str) -> PlatformFamily {
    if tag.starts_with("win") {
        PlatformFamily::Windows
    } else if tag.starts_with("macosx") {
        PlatformFamily::MacOs
    } else if tag.starts_with("manylinux") || tag.starts_with("musllinux") || tag.starts_with("linux") {
        PlatformFamily::Linux
    } else {
        PlatformFamily::Other
    }
}

/// Group platform tags by operating system family; empty groups are omitted.
#[must_use]
pub fn categorize_platforms(platforms: &BTreeSet<String>) -> BTreeMap<PlatformFamily, Vec<String>> {
    let mut groups: BTreeMap<PlatformFamily, Vec<String>> = BTreeMap::new();
    for tag in platforms {
        groups.entry(platform_family(tag)).or_default().push(tag.clone());
    }
    groups
}

/// How a package's published platforms relate to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    /// A wheel exists for the host platform.
    Current,
    /// A platform independent wheel exists.
    Any,
    /// Only a source distribution would work here.
    Source,
    Incompatible,
}

#[must_use]
pub fn compatibility(platforms: &BTreeSet<String>, current: &str) -> Compatibility {
    if platforms.contains(current) {
        Compatibility::Current
    } else if platforms.contains("any") {
        Compatibility::Any
    } else if platforms.contains(SOURCE_PLATFORM) {
        Compatibility::Source
    } else {
        Compatibility::Incompatible
    }
}

/// Best-effort platform tag of the running host, in the form pip's
/// `--platform` accepts.
#[must_use]
pub fn current_platform() -> String {
    platform_tag_for(std::env::consts::OS, std::env::consts::ARCH)
}

fn platform_tag_for(os: &str, arch: &str) -> String {
    match (os, arch) {
        ("windows", "x86_64") => "win_amd64".into(),
        ("windows", "x86") => "win32".into(),
        ("windows", "aarch64") => "win_arm64".into(),
        ("windows", other) => format!("win_{other}"),
        ("macos", "x86_64") => "macosx_10_9_x86_64".into(),
        ("macos", "aarch64") => "macosx_11_0_arm64".into(),
        ("macos", other) => format!("macosx_{other}"),
        ("linux", "x86_64") => "manylinux2014_x86_64".into(),
        ("linux", "aarch64") => "manylinux2014_aarch64".into(),
        ("linux", other) => format!("linux_{other}"),
        (os, arch) => format!("{os}_{arch}"),
    }
}
