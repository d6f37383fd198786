use std::str::FromStr;

use pep440_rs::{Version, VersionSpecifiers};

use crate::metadata::{DistributionKind, DistributionRecord, PackageMetadata};
use crate::platform::{matches, TargetSpec};

/// Pick the release to download for a specifier.
///
/// Highest satisfying version wins, preferring releases that publish an
/// artifact matching `target`. Pre-releases are only considered when the
/// specifier names one or nothing else satisfies it.
pub(crate) fn select_version(
    metadata: &PackageMetadata,
    specifiers: &VersionSpecifiers,
    target: &TargetSpec,
) -> Option<String> {
    if metadata.releases.is_empty() {
        // Version-specific documents carry no release map; trust the described version.
        let version = Version::from_str(&metadata.version).ok()?;
        return specifiers
            .contains(&version)
            .then(|| metadata.version.clone());
    }

    let explicit_pre = specifiers
        .iter()
        .any(|specifier| specifier.version().any_prerelease());
    pick(metadata, specifiers, target, explicit_pre)
        .or_else(|| (!explicit_pre).then(|| pick(metadata, specifiers, target, true)).flatten())
}

fn pick(
    metadata: &PackageMetadata,
    specifiers: &VersionSpecifiers,
    target: &TargetSpec,
    allow_pre: bool,
) -> Option<String> {
    let mut best: Option<(u8, Version, String)> = None;
    for (version_str, files) in &metadata.releases {
        let Ok(candidate) = Version::from_str(version_str) else {
            continue;
        };
        if !allow_pre && candidate.any_prerelease() {
            continue;
        }
        if !specifiers.contains(&candidate) {
            continue;
        }
        let Some(score) = release_score(files, target) else {
            continue;
        };
        let replace = match &best {
            Some((best_score, best_version, _)) => {
                score > *best_score || (score == *best_score && candidate > *best_version)
            }
            None => true,
        };
        if replace {
            best = Some((score, candidate, version_str.clone()));
        }
    }
    best.map(|(_, _, version)| version)
}

fn release_score(files: &[DistributionRecord], target: &TargetSpec) -> Option<u8> {
    let mut score = None;
    for file in files {
        if file.yanked || file.kind == DistributionKind::Other {
            continue;
        }
        if matches(file, target) {
            return Some(2);
        }
        score = Some(1);
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn release(files: &[&str]) -> Vec<DistributionRecord> {
        files
            .iter()
            .map(|name| DistributionRecord::from_filename(name, None))
            .collect()
    }

    fn metadata(releases: Vec<(&str, Vec<DistributionRecord>)>) -> PackageMetadata {
        let releases: BTreeMap<String, Vec<DistributionRecord>> = releases
            .into_iter()
            .map(|(version, files)| (version.to_string(), files))
            .collect();
        PackageMetadata {
            name: "demo".into(),
            version: releases.keys().last().cloned().unwrap_or_default(),
            releases,
            ..PackageMetadata::default()
        }
    }

    fn spec(raw: &str) -> VersionSpecifiers {
        VersionSpecifiers::from_str(raw).unwrap()
    }

    #[test]
    fn picks_highest_satisfying_final_release() {
        let meta = metadata(vec![
            ("1.0.0", release(&["demo-1.0.0.tar.gz"])),
            ("1.9.0", release(&["demo-1.9.0-py3-none-any.whl"])),
            ("2.0.0", release(&["demo-2.0.0-py3-none-any.whl"])),
            ("2.1.0rc1", release(&["demo-2.1.0rc1-py3-none-any.whl"])),
        ]);
        let target = TargetSpec::default();
        assert_eq!(select_version(&meta, &spec("<2"), &target).as_deref(), Some("1.9.0"));
        assert_eq!(select_version(&meta, &spec(">=1"), &target).as_deref(), Some("2.0.0"));
        assert_eq!(
            select_version(&meta, &spec(">=2.1.0rc1"), &target).as_deref(),
            Some("2.1.0rc1")
        );
        assert_eq!(select_version(&meta, &spec(">=3"), &target), None);
    }

    #[test]
    fn falls_back_to_prereleases_when_nothing_else_matches() {
        let meta = metadata(vec![
            ("1.0.0", release(&["demo-1.0.0.tar.gz"])),
            ("2.0.0b1", release(&["demo-2.0.0b1.tar.gz"])),
        ]);
        assert_eq!(
            select_version(&meta, &spec(">1.0"), &TargetSpec::default()).as_deref(),
            Some("2.0.0b1")
        );
    }

    #[test]
    fn skips_yanked_and_empty_releases() {
        let mut yanked = release(&["demo-1.2.0.tar.gz"]);
        yanked[0].yanked = true;
        let meta = metadata(vec![
            ("1.1.0", release(&["demo-1.1.0.tar.gz"])),
            ("1.2.0", yanked),
            ("1.3.0", Vec::new()),
        ]);
        assert_eq!(
            select_version(&meta, &spec(">=1"), &TargetSpec::default()).as_deref(),
            Some("1.1.0")
        );
    }

    #[test]
    fn prefers_releases_matching_the_target() {
        let meta = metadata(vec![
            ("1.0.0", release(&["demo-1.0.0-cp39-cp39-win_amd64.whl"])),
            ("1.1.0", release(&["demo-1.1.0-cp39-cp39-manylinux2014_x86_64.whl"])),
        ]);
        let target = TargetSpec {
            platform: Some("win_amd64".into()),
            ..TargetSpec::default()
        };
        assert_eq!(select_version(&meta, &spec(">=1"), &target).as_deref(), Some("1.0.0"));
    }

    #[test]
    fn versioned_documents_use_described_version() {
        let meta = PackageMetadata {
            name: "demo".into(),
            version: "3.1.4".into(),
            ..PackageMetadata::default()
        };
        let target = TargetSpec::default();
        assert_eq!(select_version(&meta, &spec(">=3"), &target).as_deref(), Some("3.1.4"));
        assert_eq!(select_version(&meta, &spec("<3"), &target), None);
    }
}
