use std::{fmt, str::FromStr};

use pep440_rs::{Operator, VersionSpecifiers};
use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};
use serde::Serialize;

use crate::name::normalize;

#[derive(Debug, thiserror::Error)]
pub enum RequirementError {
    #[error("failed to parse requirement `{input}`: {message}")]
    Invalid { input: String, message: String },
    #[error("URL requirements are not supported: `{0}`")]
    UrlUnsupported(String),
}

/// A package name plus optional version specifier and extras.
///
/// Identity is the normalized name; two requirements that differ only in
/// casing or separators refer to the same package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub name: String,
    pub normalized: String,
    pub specifier: Option<String>,
    pub extras: Vec<String>,
    /// Environment marker as written. Never evaluated.
    pub marker: Option<String>,
}

impl Requirement {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            normalized: normalize(name),
            specifier: None,
            extras: Vec::new(),
            marker: None,
        }
    }

    /// Parse a PEP 508 requirement string such as `requests[socks]>=2.31`.
    ///
    /// # Errors
    /// Returns an error when the string is not valid PEP 508 or names a URL.
    pub fn parse(input: &str) -> Result<Self, RequirementError> {
        let trimmed = input.trim();
        let parsed: PepRequirement =
            PepRequirement::from_str(trimmed).map_err(|err| RequirementError::Invalid {
                input: trimmed.to_string(),
                message: err.to_string(),
            })?;

        let specifier = match parsed.version_or_url.as_ref() {
            Some(VersionOrUrl::VersionSpecifier(spec)) => {
                let rendered = spec.to_string();
                (!rendered.trim().is_empty()).then_some(rendered)
            }
            Some(VersionOrUrl::Url(_)) => {
                return Err(RequirementError::UrlUnsupported(trimmed.to_string()))
            }
            None => None,
        };

        let name = parsed.name.to_string();
        let mut requirement = Self {
            normalized: normalize(&name),
            name,
            specifier,
            extras: Vec::new(),
            marker: parsed.marker.as_ref().map(ToString::to_string),
        };
        requirement.add_extras(parsed.extras.iter().map(ToString::to_string));
        Ok(requirement)
    }

    /// Merge extras into the requirement, keeping them normalized, sorted and unique.
    pub fn add_extras<I, S>(&mut self, extras: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extras
            .extend(extras.into_iter().map(|extra| normalize(extra.as_ref())));
        self.extras.retain(|extra| !extra.is_empty());
        self.extras.sort();
        self.extras.dedup();
    }

    /// Parsed version specifiers; an absent specifier matches every version.
    ///
    /// # Errors
    /// Returns an error when the stored specifier is not valid PEP 440.
    pub fn version_specifiers(&self) -> Result<VersionSpecifiers, RequirementError> {
        match self.specifier.as_deref() {
            Some(spec) => {
                VersionSpecifiers::from_str(spec).map_err(|err| RequirementError::Invalid {
                    input: self.to_string(),
                    message: err.to_string(),
                })
            }
            None => Ok(VersionSpecifiers::from_iter(std::iter::empty())),
        }
    }

    /// The version when the specifier is a single `==` or `===` clause.
    #[must_use]
    pub fn pinned_version(&self) -> Option<String> {
        let parsed = self.version_specifiers().ok()?;
        let mut iter = parsed.iter();
        let first = iter.next()?;
        if iter.next().is_some() {
            return None;
        }
        match first.operator() {
            Operator::Equal | Operator::ExactEqual => Some(first.version().to_string()),
            _ => None,
        }
    }

    pub(crate) fn extras_suffix(&self) -> String {
        if self.extras.is_empty() {
            String::new()
        } else {
            format!("[{}]", self.extras.join(","))
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.normalized, self.extras_suffix())?;
        if let Some(spec) = &self.specifier {
            write!(f, "{spec}")?;
        }
        Ok(())
    }
}
