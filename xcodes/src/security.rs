//! Gatekeeper assessment and code signing verification.
//!
//! Both checks run against an installed bundle at the same time. Either one
//! failing is fatal, but the bundle is left where it is.

use std::path::Path;
use std::thread;

use tracing::{debug, info};

use crate::archive::InstalledBundle;
use crate::error::{InstallError, InstallResult};
use crate::process::{ProcessError, ProcessRunner, ToolCommand};

/// Team identifier Xcode is signed with.
pub const EXPECTED_TEAM_IDENTIFIER: &str = "59GAB85EFG";

/// Certificate chain Xcode is signed with, leaf first.
pub const EXPECTED_AUTHORITY_CHAIN: [&str; 3] = [
    "Software Signing",
    "Apple Code Signing Certification Authority",
    "Apple Root CA",
];

const SPCTL: &str = "/usr/sbin/spctl";
const CODESIGN: &str = "/usr/bin/codesign";

/// Signing details reported by `codesign -vv -d`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningInfo {
    /// Every `Authority` line in order, root last.
    pub authority_chain: Vec<String>,
    pub team_identifier: String,
    pub bundle_identifier: String,
}

impl SigningInfo {
    /// Parse `codesign` diagnostic output.
    ///
    /// Lines are `Key=Value`; `Key: Value` is accepted too. Unknown keys are
    /// ignored.
    pub fn parse(raw: &str) -> Self {
        let mut info = Self::default();
        for line in raw.trim().lines() {
            let Some((key, value)) = split_key_value(line) else {
                continue;
            };
            match key {
                "Authority" => info.authority_chain.push(value.to_string()),
                "TeamIdentifier" => info.team_identifier = value.to_string(),
                "Identifier" => info.bundle_identifier = value.to_string(),
                _ => {}
            }
        }
        info
    }

    /// Whether this is Apple's Xcode signing identity.
    pub fn matches_expected(&self) -> bool {
        self.team_identifier == EXPECTED_TEAM_IDENTIFIER
            && self.authority_chain.iter().map(String::as_str).eq(EXPECTED_AUTHORITY_CHAIN)
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let split_at = match (line.find('='), line.find(':')) {
        (Some(eq), Some(colon)) => eq.min(colon),
        (Some(eq), None) => eq,
        (None, Some(colon)) => colon,
        (None, None) => return None,
    };
    let (key, rest) = line.split_at(split_at);
    Some((key.trim(), rest[1..].trim()))
}

/// Runs the security checks for installed bundles.
pub struct SecurityVerifier<'a> {
    runner: &'a dyn ProcessRunner,
}

impl<'a> SecurityVerifier<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self { runner }
    }

    /// Run the Gatekeeper assessment and the signing check concurrently.
    ///
    /// Both are always run to completion; the assessment error wins when
    /// both fail.
    pub fn verify(&self, bundle: &InstalledBundle) -> InstallResult<()> {
        let (assessment, signing) = thread::scope(|scope| {
            let assessment = scope.spawn(|| self.assess(bundle));
            let signing = self.verify_signing(&bundle.path);
            let assessment = assessment
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (assessment, signing)
        });
        assessment?;
        signing?;
        info!(path = %bundle.path.display(), "Security checks passed");
        Ok(())
    }

    /// Gatekeeper assessment with `spctl`.
    pub fn assess(&self, bundle: &InstalledBundle) -> InstallResult<()> {
        let command = ToolCommand::new(SPCTL).args(["--assess", "--verbose", "--type", "execute"]).arg(path_arg(&bundle.path));
        self.runner
            .run(&command)
            .map(|_| ())
            .map_err(|e| InstallError::SecurityAssessmentFailed {
                path: bundle.path.clone(),
                version: bundle.version.clone(),
                output: failure_output(e),
            })
    }

    /// Code signing identity check with `codesign`.
    pub fn verify_signing(&self, path: &Path) -> InstallResult<()> {
        let command = ToolCommand::new(CODESIGN).args(["-vv", "-d"]).arg(path_arg(path));
        let output = self
            .runner
            .run(&command)
            .map_err(|e| InstallError::CodesignVerifyFailed {
                output: failure_output(e),
            })?;

        // codesign prints its report on stderr.
        let info = SigningInfo::parse(&output.stderr);
        debug!(
            team = %info.team_identifier,
            identifier = %info.bundle_identifier,
            chain = ?info.authority_chain,
            "Parsed signing info"
        );
        if info.matches_expected() {
            Ok(())
        } else {
            Err(InstallError::SigningMismatch {
                team_identifier: info.team_identifier,
                authority_chain: info.authority_chain,
                expected_team: EXPECTED_TEAM_IDENTIFIER.to_string(),
                expected_chain: EXPECTED_AUTHORITY_CHAIN.iter().map(|s| s.to_string()).collect(),
            })
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn failure_output(error: ProcessError) -> String {
    error.output().unwrap_or_else(|| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use crate::testing::FakeRunner;
    use semver::Version;

    const CODESIGN_OUTPUT: &str = "Executable=/Applications/Xcode-11.2.0.app/Contents/MacOS/Xcode
Identifier=com.apple.dt.Xcode
Format=app bundle with Mach-O thin (x86_64)
CodeDirectory v=20200 size=434 flags=0x2000(library-validation) hashes=4+3 location=embedded
Signature size=4485
Authority=Software Signing
Authority=Apple Code Signing Certification Authority
Authority=Apple Root CA
Info.plist entries=39
TeamIdentifier=59GAB85EFG
Sealed Resources version=2 rules=13 files=253327
Internal requirements count=1 size=68";

    fn bundle() -> InstalledBundle {
        InstalledBundle::new(
            "/Applications/Xcode-11.2.0.app",
            Version::parse("11.2.0+11B52").unwrap(),
        )
    }

    fn codesign_ok(stderr: &str) -> ProcessOutput {
        ProcessOutput {
            code: 0,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_parse_signing_info() {
        let info = SigningInfo::parse(CODESIGN_OUTPUT);
        assert_eq!(info.authority_chain, EXPECTED_AUTHORITY_CHAIN.to_vec());
        assert_eq!(info.team_identifier, "59GAB85EFG");
        assert_eq!(info.bundle_identifier, "com.apple.dt.Xcode");
        assert!(info.matches_expected());
    }

    #[test]
    fn test_parse_accepts_colon_separator() {
        let info = SigningInfo::parse("TeamIdentifier: 59GAB85EFG\nAuthority: Apple Root CA\n");
        assert_eq!(info.team_identifier, "59GAB85EFG");
        assert_eq!(info.authority_chain, vec!["Apple Root CA"]);
        assert!(!info.matches_expected());
    }

    #[test]
    fn test_chain_order_matters() {
        let reordered = "Authority=Apple Root CA\nAuthority=Apple Code Signing Certification Authority\nAuthority=Software Signing\nTeamIdentifier=59GAB85EFG";
        assert!(!SigningInfo::parse(reordered).matches_expected());
    }

    #[test]
    fn test_verify_passes_with_expected_identity() {
        let runner = FakeRunner::new();
        runner.respond("codesign", codesign_ok(CODESIGN_OUTPUT));

        SecurityVerifier::new(&runner).verify(&bundle()).unwrap();

        assert_eq!(runner.count("spctl --assess"), 1);
        assert_eq!(runner.count("codesign -vv -d"), 1);
    }

    #[test]
    fn test_wrong_team_is_a_signing_mismatch() {
        let runner = FakeRunner::new();
        runner.respond(
            "codesign",
            codesign_ok(&CODESIGN_OUTPUT.replace("59GAB85EFG", "ABCDE12345")),
        );

        match SecurityVerifier::new(&runner).verify(&bundle()) {
            Err(InstallError::SigningMismatch {
                team_identifier,
                expected_team,
                ..
            }) => {
                assert_eq!(team_identifier, "ABCDE12345");
                assert_eq!(expected_team, EXPECTED_TEAM_IDENTIFIER);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_codesign_failure_carries_output() {
        let runner = FakeRunner::new();
        runner.respond(
            "codesign",
            ProcessOutput {
                code: 1,
                stdout: String::new(),
                stderr: "code object is not signed at all".to_string(),
            },
        );

        match SecurityVerifier::new(&runner).verify(&bundle()) {
            Err(InstallError::CodesignVerifyFailed { output }) => {
                assert_eq!(output, "code object is not signed at all");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_assessment_failure_keeps_bundle_details() {
        let runner = FakeRunner::new();
        runner.respond(
            "spctl",
            ProcessOutput {
                code: 3,
                stdout: String::new(),
                stderr: "/Applications/Xcode-11.2.0.app: rejected".to_string(),
            },
        );
        runner.respond("codesign", codesign_ok(CODESIGN_OUTPUT));

        match SecurityVerifier::new(&runner).verify(&bundle()) {
            Err(InstallError::SecurityAssessmentFailed { path, output, .. }) => {
                assert_eq!(path, bundle().path);
                assert!(output.contains("rejected"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // The signing check still ran.
        assert_eq!(runner.count("codesign"), 1);
    }
}
