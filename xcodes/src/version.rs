//! Tolerant version parsing and Xcode-flavoured formatting.
//!
//! Xcode versions are spelled loosely by people ("11.2", "11 Beta 7",
//! "11.2 GM seed") and strictly by the catalog (`11.2.0-beta.3+11B41`).
//! Everything is normalised into a [`semver::Version`], where the prerelease
//! carries the beta/GM qualifier and the build metadata carries the Apple
//! build number.

use std::sync::OnceLock;

use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};

/// File name prefix shared by archives and installed bundles.
pub const XCODE_FILE_PREFIX: &str = "Xcode-";

fn version_grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(?P<major>\d+)
            (?:\.(?P<minor>\d+))?
            (?:\.(?P<patch>\d+))?
            (?:[\s.\-]+(?P<pre>[0-9A-Za-z][0-9A-Za-z\s.\-]*?))?
            (?:\+(?P<build>[0-9A-Za-z.\-]+))?
            \s*$",
        )
        .expect("version grammar is valid")
    })
}

/// Parse a loosely written Xcode version.
///
/// Accepts `11.2`, `11.2.1`, `11 Beta 7`, `11.2 GM seed`,
/// `11.4 Release Candidate 2`, gem style `12.0.beta.3` and full semver
/// strings with build metadata.
///
/// # Example
///
/// ```
/// use xcodes::version::parse_xcode_version;
///
/// let version = parse_xcode_version("11.2 Beta 3").unwrap();
/// assert_eq!(version.to_string(), "11.2.0-beta.3");
///
/// let seed = parse_xcode_version("11.2 GM seed").unwrap();
/// assert_eq!(seed.to_string(), "11.2.0-gm-seed");
/// ```
pub fn parse_xcode_version(input: &str) -> Option<Version> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let caps = version_grammar().captures(input)?;
    let number = |name: &str| -> Option<u64> {
        caps.name(name)
            .map(|m| m.as_str().parse::<u64>())
            .transpose()
            .ok()
            .flatten()
    };

    let major = number("major")?;
    let minor = number("minor").unwrap_or(0);
    let patch = number("patch").unwrap_or(0);

    let mut version = Version::new(major, minor, patch);

    if let Some(pre) = caps.name("pre") {
        let normalized = normalize_prerelease(pre.as_str())?;
        version.pre = Prerelease::new(&normalized).ok()?;
    }

    if let Some(build) = caps.name("build") {
        version.build = BuildMetadata::new(build.as_str()).ok()?;
    }

    Some(version)
}

/// Turn a human prerelease qualifier into dot-separated semver identifiers.
fn normalize_prerelease(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let lowered = lowered
        .replace("release candidate", "rc")
        .replace("gm seed", "gm-seed");

    let identifiers: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || c == '.')
        .filter(|part| !part.is_empty())
        .collect();

    if identifiers.is_empty() {
        return None;
    }

    Some(identifiers.join("."))
}

/// Read the first version found in a `.xcode-version` marker file body.
pub fn parse_version_marker(contents: &str) -> Option<Version> {
    contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .and_then(parse_xcode_version)
}

/// Xcode-specific helpers on [`semver::Version`].
pub trait VersionExt {
    /// Whether the version carries a prerelease qualifier.
    fn is_prerelease(&self) -> bool;

    /// Equality over major, minor, patch and prerelease only.
    fn eq_ignoring_build(&self, other: &Version) -> bool;

    /// The version with build metadata stripped.
    fn without_build_metadata(&self) -> Version;

    /// The semver string without the `+build` suffix.
    fn description_without_build_metadata(&self) -> String;

    /// The way Xcode presents its own version, e.g. `11.2 Beta 3 (11B41)`.
    fn xcode_description(&self) -> String;
}

impl VersionExt for Version {
    fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    fn eq_ignoring_build(&self, other: &Version) -> bool {
        self.major == other.major
            && self.minor == other.minor
            && self.patch == other.patch
            && self.pre == other.pre
    }

    fn without_build_metadata(&self) -> Version {
        let mut version = self.clone();
        version.build = BuildMetadata::EMPTY;
        version
    }

    fn description_without_build_metadata(&self) -> String {
        self.without_build_metadata().to_string()
    }

    fn xcode_description(&self) -> String {
        let mut out = format!("{}.{}", self.major, self.minor);
        if self.patch != 0 {
            out.push_str(&format!(".{}", self.patch));
        }

        if !self.pre.is_empty() {
            for identifier in self.pre.as_str().split('.') {
                out.push(' ');
                out.push_str(&present_identifier(identifier));
            }
        }

        if !self.build.is_empty() {
            out.push_str(&format!(" ({})", self.build));
        }

        out
    }
}

fn present_identifier(identifier: &str) -> String {
    match identifier {
        "beta" => "Beta".to_string(),
        "gm" => "GM".to_string(),
        "gm-seed" => "GM seed".to_string(),
        "rc" => "Release Candidate".to_string(),
        other => other.to_string(),
    }
}
