//! Privileged post-install steps.
//!
//! Superuser access is obtained once per install and the resulting
//! [`Credential`] is handed to every step that needs it.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::{plist_string, InstalledBundle};
use crate::error::{InstallError, InstallResult};
use crate::files::FileSystem;
use crate::process::{ProcessRunner, ToolCommand};

const SUDO: &str = "/usr/bin/sudo";
const DEV_TOOLS_SECURITY: &str = "/usr/sbin/DevToolsSecurity";
const DSEDITGROUP: &str = "/usr/sbin/dseditgroup";
const GETCONF: &str = "/usr/bin/getconf";
const SW_VERS: &str = "/usr/bin/sw_vers";
const TOUCH: &str = "/usr/bin/touch";

/// Prompt shown when asking for the sudo password.
pub const PASSWORD_PROMPT: &str = "macOS User Password: ";

/// Secure single-line input for the superuser password.
pub trait PasswordPrompt: Send + Sync {
    /// Ask for a password. `None` means the user gave nothing.
    fn read_password(&self, prompt: &str) -> Option<String>;
}

/// A prompt that never answers, for non-interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn read_password(&self, _prompt: &str) -> Option<String> {
        None
    }
}

/// Proof of superuser access.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// sudo already holds a valid timestamp.
    Cached,
    /// A password that sudo accepted.
    Password(String),
}

impl Credential {
    /// Wrap `command` so it runs as the superuser.
    pub fn elevate(&self, command: ToolCommand) -> ToolCommand {
        let elevated = match self {
            Self::Cached => ToolCommand::new(SUDO).arg("-n"),
            Self::Password(password) => ToolCommand::new(SUDO).arg("-S").stdin(password.clone()),
        };
        let elevated = elevated
            .arg(command.program())
            .args(command.arguments().iter().cloned());
        match command.working_dir() {
            Some(dir) => elevated.current_dir(dir),
            None => elevated,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => f.write_str("Cached"),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Get superuser access, asking for the password only when sudo has no
/// valid timestamp.
pub fn obtain_credential(runner: &dyn ProcessRunner, prompt: &dyn PasswordPrompt) -> InstallResult<Credential> {
    if runner.run(&ToolCommand::new(SUDO).arg("-vn")).is_ok() {
        debug!("sudo timestamp is valid");
        return Ok(Credential::Cached);
    }

    let password = prompt
        .read_password(PASSWORD_PROMPT)
        .filter(|p| !p.is_empty())
        .ok_or(InstallError::MissingPassword)?;

    runner.run(&ToolCommand::new(SUDO).args(["-S", "-v"]).stdin(password.clone()))?;
    Ok(Credential::Password(password))
}

/// Runs the post-install steps for one bundle.
pub struct PostInstall<'a> {
    runner: &'a dyn ProcessRunner,
    files: &'a dyn FileSystem,
}

impl<'a> PostInstall<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, files: &'a dyn FileSystem) -> Self {
        Self { runner, files }
    }

    /// Every finishing step, in order. Any failure stops the rest.
    pub fn finish(&self, bundle: &InstalledBundle, credential: &Credential) -> InstallResult<()> {
        self.enable_developer_mode(credential)?;
        self.approve_license(bundle, credential)?;
        self.install_components(bundle, credential)?;
        self.touch_install_check(bundle, credential)?;
        info!(path = %bundle.path.display(), "Post-install steps complete");
        Ok(())
    }

    /// Turn on developer mode and let `staff` members use developer tools.
    pub fn enable_developer_mode(&self, credential: &Credential) -> InstallResult<()> {
        self.run_elevated(credential, ToolCommand::new(DEV_TOOLS_SECURITY).arg("-enable"))?;
        self.run_elevated(
            credential,
            ToolCommand::new(DSEDITGROUP).args(["-o", "edit", "-t", "group", "-a", "staff", "_developer"]),
        )
    }

    pub fn approve_license(&self, bundle: &InstalledBundle, credential: &Credential) -> InstallResult<()> {
        self.run_elevated(credential, xcodebuild(bundle).args(["-license", "accept"]))
    }

    /// Install the additional components Xcode otherwise asks for on first launch.
    pub fn install_components(&self, bundle: &InstalledBundle, credential: &Credential) -> InstallResult<()> {
        self.run_elevated(credential, xcodebuild(bundle).arg("-runFirstLaunch"))
    }

    /// Record that this Xcode build was checked on this macOS build, so
    /// Xcode skips its own install check on launch.
    pub fn touch_install_check(&self, bundle: &InstalledBundle, credential: &Credential) -> InstallResult<()> {
        let cache_dir = self.runner.run(&ToolCommand::new(GETCONF).arg("DARWIN_USER_CACHE_DIR"))?;
        let macos_build = self.runner.run(&ToolCommand::new(SW_VERS).arg("-buildVersion"))?;
        let xcode_build = self.xcode_build(bundle)?;

        let marker = install_check_path(cache_dir.stdout.trim(), macos_build.stdout.trim(), &xcode_build);
        debug!(marker = %marker.display(), "Touching install check cache");
        self.run_elevated(credential, ToolCommand::new(TOUCH).arg(marker.display().to_string()))
    }

    /// The bundle's build number, from its version or its `version.plist`.
    fn xcode_build(&self, bundle: &InstalledBundle) -> InstallResult<String> {
        if !bundle.version.build.is_empty() {
            return Ok(bundle.version.build.to_string());
        }
        let plist_path = bundle.path.join("Contents").join("version.plist");
        let plist = self
            .files
            .read_to_string(&plist_path)
            .map_err(|e| InstallError::io("Failed to read", &plist_path, e))?;
        plist_string(&plist, "ProductBuildVersion").ok_or_else(|| {
            InstallError::io(
                "Missing ProductBuildVersion in",
                &plist_path,
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            )
        })
    }

    fn run_elevated(&self, credential: &Credential, command: ToolCommand) -> InstallResult<()> {
        self.runner.run(&credential.elevate(command))?;
        Ok(())
    }
}

fn xcodebuild(bundle: &InstalledBundle) -> ToolCommand {
    let path = bundle
        .path
        .join("Contents/Developer/usr/bin/xcodebuild");
    ToolCommand::new(path.display().to_string())
}

/// `<cache dir>com.apple.dt.Xcode.InstallCheckCache_<macOS build>_<Xcode build>`
pub fn install_check_path(cache_dir: &str, macos_build: &str, xcode_build: &str) -> PathBuf {
    let name = format!(
        "com.apple.dt.Xcode.InstallCheckCache_{}_{}",
        macos_build, xcode_build
    );
    Path::new(cache_dir).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use crate::testing::{FakeFileSystem, FakePrompt, FakeRunner};
    use semver::Version;

    fn bundle() -> InstalledBundle {
        InstalledBundle::new(
            "/Applications/Xcode-11.2.0.app",
            Version::parse("11.2.0+11B52").unwrap(),
        )
    }

    fn failure(stderr: &str) -> ProcessOutput {
        ProcessOutput {
            code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_cached_sudo_skips_prompt() {
        let runner = FakeRunner::new();
        let prompt = FakePrompt::with_password("hunter2");

        let credential = obtain_credential(&runner, &prompt).unwrap();

        assert_eq!(credential, Credential::Cached);
        assert!(prompt.prompts().is_empty());
    }

    #[test]
    fn test_password_is_prompted_once_and_validated() {
        let runner = FakeRunner::new();
        runner.respond("sudo -vn", failure("a password is required"));
        let prompt = FakePrompt::with_password("hunter2");

        let credential = obtain_credential(&runner, &prompt).unwrap();

        assert_eq!(credential, Credential::Password("hunter2".to_string()));
        assert_eq!(prompt.prompts(), vec![PASSWORD_PROMPT.to_string()]);
        assert_eq!(runner.inputs("sudo -S -v"), vec![Some("hunter2".to_string())]);
    }

    #[test]
    fn test_empty_password_is_missing() {
        let runner = FakeRunner::new();
        runner.respond("sudo -vn", failure("a password is required"));

        let err = obtain_credential(&runner, &FakePrompt::empty()).unwrap_err();
        assert!(matches!(err, InstallError::MissingPassword));
    }

    #[test]
    fn test_wrong_password_carries_sudo_output() {
        let runner = FakeRunner::new();
        runner.respond("sudo -vn", failure("a password is required"));
        runner.respond("sudo -S -v", failure("Sorry, try again."));

        let err = obtain_credential(&runner, &FakePrompt::with_password("nope")).unwrap_err();
        assert!(err.to_string().contains("Sorry, try again."));
    }

    #[test]
    fn test_credential_debug_hides_password() {
        let credential = Credential::Password("hunter2".to_string());
        assert!(!format!("{:?}", credential).contains("hunter2"));
    }

    #[test]
    fn test_finish_runs_steps_in_order() {
        let runner = FakeRunner::new();
        runner.respond("getconf", ProcessOutput::success("/var/folders/zz/abc/C/\n"));
        runner.respond("sw_vers", ProcessOutput::success("19B88\n"));
        let files = FakeFileSystem::new();
        let credential = Credential::Password("hunter2".to_string());

        PostInstall::new(&runner, &files).finish(&bundle(), &credential).unwrap();

        let xcodebuild = "/Applications/Xcode-11.2.0.app/Contents/Developer/usr/bin/xcodebuild";
        assert_eq!(
            runner.commands(),
            vec![
                "/usr/bin/sudo -S /usr/sbin/DevToolsSecurity -enable".to_string(),
                "/usr/bin/sudo -S /usr/sbin/dseditgroup -o edit -t group -a staff _developer".to_string(),
                format!("/usr/bin/sudo -S {} -license accept", xcodebuild),
                format!("/usr/bin/sudo -S {} -runFirstLaunch", xcodebuild),
                "/usr/bin/getconf DARWIN_USER_CACHE_DIR".to_string(),
                "/usr/bin/sw_vers -buildVersion".to_string(),
                "/usr/bin/sudo -S /usr/bin/touch /var/folders/zz/abc/C/com.apple.dt.Xcode.InstallCheckCache_19B88_11B52".to_string(),
            ]
        );
        // Every elevated step got the password on stdin.
        assert!(runner
            .inputs("/usr/bin/sudo -S")
            .iter()
            .all(|input| input.as_deref() == Some("hunter2")));
    }

    #[test]
    fn test_license_failure_stops_finishing() {
        let runner = FakeRunner::new();
        runner.respond("-license accept", failure("xcodebuild: error: license agreement"));
        let files = FakeFileSystem::new();

        let err = PostInstall::new(&runner, &files)
            .finish(&bundle(), &Credential::Cached)
            .unwrap_err();

        assert!(err.to_string().contains("license agreement"));
        assert_eq!(runner.count("-runFirstLaunch"), 0);
    }

    #[test]
    fn test_build_read_from_version_plist_when_missing() {
        let runner = FakeRunner::new();
        runner.respond("getconf", ProcessOutput::success("/cache/\n"));
        runner.respond("sw_vers", ProcessOutput::success("19B88\n"));
        let files = FakeFileSystem::new();
        files.add_file(
            "/Applications/Xcode-11.2.0.app/Contents/version.plist",
            "<dict><key>ProductBuildVersion</key><string>11B52</string></dict>",
        );
        let bundle = InstalledBundle::new("/Applications/Xcode-11.2.0.app", Version::new(11, 2, 0));

        PostInstall::new(&runner, &files)
            .touch_install_check(&bundle, &Credential::Cached)
            .unwrap();

        assert_eq!(
            runner.count("/usr/bin/sudo -n /usr/bin/touch /cache/com.apple.dt.Xcode.InstallCheckCache_19B88_11B52"),
            1
        );
    }
}
