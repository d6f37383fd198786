use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result};
use reqwest::{blocking::Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::name::normalize;
use crate::platform::parse_wheel_filename;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("package `{name}`{} was not found on the index", version_suffix(.version.as_deref()))]
    NotFound {
        name: String,
        version: Option<String>,
    },
    #[error("failed to query the index for `{name}`: {message}")]
    Network { name: String, message: String },
    #[error("malformed metadata for `{name}`: {message}")]
    Malformed { name: String, message: String },
}

fn version_suffix(version: Option<&str>) -> String {
    version.map(|v| format!(" (version {v})")).unwrap_or_default()
}

/// Where package metadata documents come from.
pub trait MetadataSource {
    /// Fetch the metadata document for `name`, either for a specific version or
    /// for the index's default (latest) version.
    ///
    /// # Errors
    /// `NotFound` when the package or version is absent, `Network` on transport
    /// failures, `Malformed` when the document does not have the expected shape.
    fn fetch_metadata(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<PackageMetadata, MetadataError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    Wheel,
    Source,
    /// Legacy formats (eggs, installers) that pip download never selects.
    Other,
}

/// One downloadable artifact of a package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionRecord {
    pub filename: String,
    pub kind: DistributionKind,
    pub python_tags: Vec<String>,
    pub abi_tags: Vec<String>,
    pub platform_tags: Vec<String>,
    pub sha256: Option<String>,
    pub yanked: bool,
}

impl DistributionRecord {
    /// Classify an artifact by its filename, falling back to the index's
    /// `packagetype` for source archives with unusual extensions.
    #[must_use]
    pub fn from_filename(filename: &str, packagetype: Option<&str>) -> Self {
        let mut record = Self {
            filename: filename.to_string(),
            kind: DistributionKind::Other,
            python_tags: Vec::new(),
            abi_tags: Vec::new(),
            platform_tags: Vec::new(),
            sha256: None,
            yanked: false,
        };
        if let Ok(tags) = parse_wheel_filename(filename) {
            record.kind = DistributionKind::Wheel;
            record.python_tags = tags.python;
            record.abi_tags = tags.abi;
            record.platform_tags = tags.platform;
        } else if packagetype == Some("sdist") || is_source_archive(filename) {
            record.kind = DistributionKind::Source;
        }
        record
    }

    #[must_use]
    pub fn is_wheel(&self) -> bool {
        self.kind == DistributionKind::Wheel
    }

    #[must_use]
    pub fn is_source(&self) -> bool {
        self.kind == DistributionKind::Source
    }
}

fn is_source_archive(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    [".tar.gz", ".tgz", ".tar.bz2", ".tar.xz", ".zip"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Validated metadata document for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: String,
    /// Version this document describes.
    pub version: String,
    /// Raw `requires_dist` dependency strings of `version`.
    pub requires_dist: Vec<String>,
    /// Artifacts of `version`.
    pub distributions: Vec<DistributionRecord>,
    /// Artifacts per release, when the index lists them.
    pub releases: BTreeMap<String, Vec<DistributionRecord>>,
}

impl PackageMetadata {
    /// Validate a JSON metadata document.
    ///
    /// # Errors
    /// Returns `MetadataError::Malformed` when required fields are missing or
    /// have the wrong type.
    pub fn from_json(name: &str, body: &[u8]) -> Result<Self, MetadataError> {
        let malformed = |message: String| MetadataError::Malformed {
            name: name.to_string(),
            message,
        };
        let document: RawDocument =
            serde_json::from_slice(body).map_err(|err| malformed(err.to_string()))?;
        let info = document
            .info
            .ok_or_else(|| malformed("missing `info` object".into()))?;
        let package_name = info
            .name
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| malformed("missing `info.name`".into()))?;
        let version = info
            .version
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| malformed("missing `info.version`".into()))?;

        let releases: BTreeMap<String, Vec<DistributionRecord>> = document
            .releases
            .unwrap_or_default()
            .into_iter()
            .map(|(release, files)| (release, files.into_iter().map(RawFile::into_record).collect()))
            .collect();

        let distributions = match document.urls {
            Some(urls) if !urls.is_empty() => urls.into_iter().map(RawFile::into_record).collect(),
            _ => releases.get(&version).cloned().unwrap_or_default(),
        };

        Ok(Self {
            name: package_name,
            version,
            requires_dist: info.requires_dist.unwrap_or_default(),
            distributions,
            releases,
        })
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.releases.keys().map(String::as_str)
    }

    /// Artifacts published for `version`.
    #[must_use]
    pub fn distributions_for(&self, version: &str) -> &[DistributionRecord] {
        if version == self.version && !self.distributions.is_empty() {
            return &self.distributions;
        }
        self.releases
            .get(version)
            .map_or(&[][..], Vec::as_slice)
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    info: Option<RawInfo>,
    #[serde(default)]
    releases: Option<BTreeMap<String, Vec<RawFile>>>,
    #[serde(default)]
    urls: Option<Vec<RawFile>>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    filename: String,
    #[serde(default)]
    packagetype: Option<String>,
    #[serde(default)]
    yanked: Option<bool>,
    #[serde(default)]
    digests: Option<RawDigests>,
}

#[derive(Debug, Deserialize)]
struct RawDigests {
    sha256: Option<String>,
}

impl RawFile {
    fn into_record(self) -> DistributionRecord {
        let mut record = DistributionRecord::from_filename(&self.filename, self.packagetype.as_deref());
        record.yanked = self.yanked.unwrap_or(false);
        record.sha256 = self
            .digests
            .and_then(|digests| digests.sha256)
            .map(|digest| digest.to_ascii_lowercase());
        record
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub index_url: String,
    pub timeout: Duration,
    pub keep_proxies: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            timeout: Duration::from_secs(30),
            keep_proxies: false,
        }
    }
}

/// Metadata client for the PyPI JSON API (`<index>/<name>[/<version>]/json`).
pub struct PypiJsonClient {
    client: Client,
    base: String,
}

impl PypiJsonClient {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(format!("dlpipkle/{}", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout);
        if !options.keep_proxies {
            builder = builder.no_proxy();
        }
        let client = builder.build().context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base: options.index_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, name: &str, version: Option<&str>) -> String {
        match version {
            Some(version) => format!("{}/{name}/{version}/json", self.base),
            None => format!("{}/{name}/json", self.base),
        }
    }
}

impl MetadataSource for PypiJsonClient {
    fn fetch_metadata(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<PackageMetadata, MetadataError> {
        let normalized = normalize(name);
        let url = self.url(&normalized, version);
        debug!(%url, "fetching package metadata");
        let network = |message: String| MetadataError::Network {
            name: normalized.clone(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| network(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound {
                name: normalized,
                version: version.map(ToOwned::to_owned),
            });
        }
        let body = response
            .error_for_status()
            .map_err(|err| network(err.to_string()))?
            .bytes()
            .map_err(|err| network(err.to_string()))?;
        PackageMetadata::from_json(&normalized, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::panic;

    const REQUESTS_DOC: &str = r#"{
        "info": {
            "name": "requests",
            "version": "2.32.3",
            "requires_dist": [
                "charset-normalizer<4,>=2",
                "idna<4,>=2.5",
                "PySocks!=1.5.7,>=1.5.6; extra == \"socks\""
            ]
        },
        "releases": {
            "2.31.0": [
                {"filename": "requests-2.31.0.tar.gz", "packagetype": "sdist", "digests": {"sha256": "AA"}}
            ],
            "2.32.3": [
                {"filename": "requests-2.32.3-py3-none-any.whl", "packagetype": "bdist_wheel", "digests": {"sha256": "bb"}},
                {"filename": "requests-2.32.3.tar.gz", "packagetype": "sdist", "yanked": false}
            ]
        },
        "urls": [
            {"filename": "requests-2.32.3-py3-none-any.whl", "packagetype": "bdist_wheel", "digests": {"sha256": "bb"}}
        ]
    }"#;

    fn server_or_skip(test: &str) -> Option<Server> {
        match panic::catch_unwind(Server::run) {
            Ok(server) => Some(server),
            Err(_) => {
                eprintln!("skipping {test} (httptest server unavailable)");
                None
            }
        }
    }

    fn client_for(server: &Server) -> PypiJsonClient {
        let options = ClientOptions {
            index_url: server.url_str("/pypi"),
            ..ClientOptions::default()
        };
        PypiJsonClient::new(&options).expect("client")
    }

    #[test]
    fn parses_structured_document() {
        let metadata = PackageMetadata::from_json("requests", REQUESTS_DOC.as_bytes()).unwrap();
        assert_eq!(metadata.name, "requests");
        assert_eq!(metadata.version, "2.32.3");
        assert_eq!(metadata.requires_dist.len(), 3);
        assert_eq!(metadata.versions().collect::<Vec<_>>(), vec!["2.31.0", "2.32.3"]);
        assert_eq!(metadata.distributions.len(), 1);
        assert!(metadata.distributions[0].is_wheel());
        let old = metadata.distributions_for("2.31.0");
        assert_eq!(old.len(), 1);
        assert!(old[0].is_source());
        assert_eq!(old[0].sha256.as_deref(), Some("aa"));
        assert!(metadata.distributions_for("0.0.1").is_empty());
    }

    #[test]
    fn null_requires_dist_is_empty() {
        let body = r#"{"info": {"name": "idna", "version": "3.7", "requires_dist": null}, "releases": {}}"#;
        let metadata = PackageMetadata::from_json("idna", body.as_bytes()).unwrap();
        assert!(metadata.requires_dist.is_empty());
        assert!(metadata.releases.is_empty());
    }

    #[test]
    fn missing_fields_are_malformed() {
        for body in [
            r#"{"releases": {}}"#,
            r#"{"info": {"version": "1.0"}}"#,
            r#"{"info": {"name": "demo"}}"#,
            r#"{"info": {"name": "demo", "version": "1.0"}, "releases": []}"#,
            "not json",
        ] {
            let err = PackageMetadata::from_json("demo", body.as_bytes()).unwrap_err();
            assert!(
                matches!(err, MetadataError::Malformed { .. }),
                "expected malformed for {body}: {err:?}"
            );
        }
    }

    #[test]
    fn classifies_distribution_records() {
        let wheel = DistributionRecord::from_filename(
            "numpy-1.26.4-cp312-cp312-manylinux_2_17_x86_64.manylinux2014_x86_64.whl",
            Some("bdist_wheel"),
        );
        assert!(wheel.is_wheel());
        assert_eq!(wheel.platform_tags.len(), 2);
        let sdist = DistributionRecord::from_filename("numpy-1.26.4.tar.gz", None);
        assert!(sdist.is_source());
        let egg = DistributionRecord::from_filename("numpy-1.0-py2.7.egg", Some("bdist_egg"));
        assert_eq!(egg.kind, DistributionKind::Other);
    }

    #[test]
    fn client_fetches_default_and_versioned_documents() {
        let Some(server) = server_or_skip("client_fetches_default_and_versioned_documents") else {
            return;
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/pypi/requests/json"))
                .respond_with(status_code(200).body(REQUESTS_DOC)),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/pypi/requests/2.32.3/json"))
                .respond_with(status_code(200).body(REQUESTS_DOC)),
        );
        let client = client_for(&server);
        let latest = client.fetch_metadata("Requests", None).unwrap();
        assert_eq!(latest.version, "2.32.3");
        let pinned = client.fetch_metadata("requests", Some("2.32.3")).unwrap();
        assert_eq!(pinned.requires_dist, latest.requires_dist);
    }

    #[test]
    fn client_maps_status_codes() {
        let Some(server) = server_or_skip("client_maps_status_codes") else {
            return;
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/pypi/missing/json"))
                .respond_with(status_code(404)),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/pypi/broken/json"))
                .respond_with(status_code(503)),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/pypi/garbled/json"))
                .respond_with(status_code(200).body("{\"info\": 7}")),
        );
        let client = client_for(&server);
        assert!(matches!(
            client.fetch_metadata("missing", None),
            Err(MetadataError::NotFound { .. })
        ));
        assert!(matches!(
            client.fetch_metadata("broken", None),
            Err(MetadataError::Network { .. })
        ));
        assert!(matches!(
            client.fetch_metadata("garbled", None),
            Err(MetadataError::Malformed { .. })
        ));
    }
}
