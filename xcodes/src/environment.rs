//! Collaborators the installer runs against.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::{CachedCatalog, Catalog};
use crate::config::InstallerConfig;
use crate::download::{AcceleratedTransfer, DirectTransfer, TransferStrategy};
use crate::error::{InstallError, InstallResult};
use crate::files::{FileSystem, LocalFileSystem};
use crate::output::{LogSink, OutputSink};
use crate::pipeline::{NoPrompt, PasswordPrompt};
use crate::process::{ProcessRunner, SystemProcessRunner};
use crate::session::SessionProvider;

/// Everything outside the pipeline that it talks to.
#[derive(Clone)]
pub struct Environment {
    pub session: Arc<dyn SessionProvider>,
    pub catalog: Arc<dyn Catalog>,
    pub runner: Arc<dyn ProcessRunner>,
    pub files: Arc<dyn FileSystem>,
    pub transfer: Arc<dyn TransferStrategy>,
    pub output: Arc<dyn OutputSink>,
    pub prompt: Arc<dyn PasswordPrompt>,
}

impl Environment {
    /// Assemble an environment from explicit collaborators.
    ///
    /// Output goes to the log and password prompts are declined until
    /// replaced with [`with_output`](Self::with_output) and
    /// [`with_prompt`](Self::with_prompt).
    pub fn new(
        session: Arc<dyn SessionProvider>,
        catalog: Arc<dyn Catalog>,
        runner: Arc<dyn ProcessRunner>,
        files: Arc<dyn FileSystem>,
        transfer: Arc<dyn TransferStrategy>,
    ) -> Self {
        Self {
            session,
            catalog,
            runner,
            files,
            transfer,
            output: Arc::new(LogSink),
            prompt: Arc::new(NoPrompt),
        }
    }

    /// The real machine: local disk, spawned tools and a cached catalog.
    ///
    /// `aria2c` is used when configured and present, otherwise archives are
    /// fetched over direct HTTP.
    pub fn system(config: &InstallerConfig, session: Arc<dyn SessionProvider>) -> InstallResult<Self> {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemProcessRunner);
        let files: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());

        let catalog = CachedCatalog::new(&config.catalog_cache_file)
            .with_max_age(config.catalog_max_age)
            .with_source_url(config.catalog_source_url.clone())
            .with_timeout(config.timeout);

        let transfer: Arc<dyn TransferStrategy> = match &config.aria2_path {
            Some(path) if files.exists(path) => {
                info!(aria2 = %path.display(), "Using aria2 for downloads");
                Arc::new(AcceleratedTransfer::new(path.clone(), runner.clone()))
            }
            other => {
                if let Some(path) = other {
                    debug!(aria2 = %path.display(), "aria2 not found, using direct downloads");
                }
                let direct = DirectTransfer::new(config.timeout)
                    .map_err(|e| InstallError::HttpClient(e.to_string()))?;
                Arc::new(direct)
            }
        };

        Ok(Self::new(session, Arc::new(catalog), runner, files, transfer))
    }

    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PasswordPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn TransferStrategy>) -> Self {
        self.transfer = transfer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticSession;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_missing_aria2_falls_back_to_direct() {
        let temp = TempDir::new().unwrap();
        let config = InstallerConfig::new(temp.path().join("Applications"), temp.path().join("archives"))
            .with_aria2_path(Some(PathBuf::from("/nonexistent/aria2c")));

        let env = Environment::system(&config, Arc::new(StaticSession::default())).unwrap();
        assert_eq!(env.transfer.name(), "direct");
    }

    #[test]
    fn test_present_aria2_is_used() {
        let temp = TempDir::new().unwrap();
        let aria2 = temp.path().join("aria2c");
        std::fs::write(&aria2, "").unwrap();
        let config = InstallerConfig::new(temp.path().join("Applications"), temp.path().join("archives"))
            .with_aria2_path(Some(aria2));

        let env = Environment::system(&config, Arc::new(StaticSession::default())).unwrap();
        assert_eq!(env.transfer.name(), "aria2");
    }
}
