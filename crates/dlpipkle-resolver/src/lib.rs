//! Dependency discovery against a package index's JSON metadata API.
//!
//! The resolver is a plain breadth-first walk over `requires_dist` strings:
//! no constraint solving and no marker evaluation. Every package is pinned to
//! one release chosen from the index so it can be downloaded on its own.

mod metadata;
mod name;
mod platform;
mod requirement;
mod resolve;
mod select;
mod tree;

pub use metadata::{
    ClientOptions, DistributionKind, DistributionRecord, MetadataError, MetadataSource,
    PackageMetadata, PypiJsonClient, DEFAULT_INDEX_URL,
};
pub use name::normalize;
pub use platform::{
    categorize_platforms, compatibility, current_platform, list_platforms, matches,
    parse_wheel_filename, platform_family, platforms_of, Compatibility, InvalidFilename,
    PlatformFamily, TargetSpec, WheelTags, SOURCE_PLATFORM,
};
pub use requirement::{Requirement, RequirementError};
pub use resolve::{
    resolve, Resolution, ResolutionWarning, ResolveRequest, ResolvedPackage, WarningKind,
};
pub use tree::render_tree;
