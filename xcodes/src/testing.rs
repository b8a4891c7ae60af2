//! In-memory collaborators for tests.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::archive::ArchiveReference;
use crate::catalog::{Catalog, CatalogError};
use crate::download::{DownloadTask, ResumeToken, TransferError, TransferProgress, TransferStrategy};
use crate::error::{InstallError, InstallResult};
use crate::files::FileSystem;
use crate::output::OutputSink;
use crate::pipeline::PasswordPrompt;
use crate::process::{for_each_line, ProcessError, ProcessOutput, ProcessRunner, ToolCommand};
use crate::session::SessionProvider;

/// Where [`FakeFileSystem::trash`] puts things.
pub const FAKE_TRASH_DIR: &str = "/Trash";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

#[derive(Default)]
struct Tree {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl Tree {
    fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
            || self.dirs.contains(path)
            || self.files.keys().any(|p| p.starts_with(path))
            || self.dirs.iter().any(|p| p.starts_with(path))
    }

    /// Remove `path` and everything below it, returning what was removed.
    fn take(&mut self, path: &Path) -> (Vec<(PathBuf, Vec<u8>)>, Vec<PathBuf>) {
        let files: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        let files = files
            .into_iter()
            .filter_map(|p| self.files.remove(&p).map(|bytes| (p, bytes)))
            .collect();
        let dirs: Vec<PathBuf> = self.dirs.iter().filter(|p| p.starts_with(path)).cloned().collect();
        for dir in &dirs {
            self.dirs.remove(dir);
        }
        (files, dirs)
    }
}

/// A [`FileSystem`] held in memory.
///
/// Directories exist implicitly when any file lives below them.
#[derive(Default)]
pub struct FakeFileSystem {
    tree: Mutex<Tree>,
    trashed: Mutex<Vec<PathBuf>>,
    fail_trash: AtomicBool,
}

impl FakeFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file.
    pub fn add_file(&self, path: impl Into<PathBuf>, contents: impl AsRef<[u8]>) {
        lock(&self.tree)
            .files
            .insert(path.into(), contents.as_ref().to_vec());
    }

    /// Seed an empty directory.
    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        lock(&self.tree).dirs.insert(path.into());
    }

    /// File contents as text, if the file exists.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        lock(&self.tree)
            .files
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Files directly inside `dir` with the given extension.
    pub fn paths_with_extension(&self, dir: impl AsRef<Path>, extension: &str) -> Vec<PathBuf> {
        let dir = dir.as_ref();
        lock(&self.tree)
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter(|p| p.extension().is_some_and(|ext| ext == extension))
            .cloned()
            .collect()
    }

    /// Original locations of everything moved to the trash, in order.
    pub fn trashed(&self) -> Vec<PathBuf> {
        lock(&self.trashed).clone()
    }

    /// Make every later [`FileSystem::trash`] call fail.
    pub fn fail_trash(&self, fail: bool) {
        self.fail_trash.store(fail, Ordering::SeqCst);
    }
}

impl FileSystem for FakeFileSystem {
    fn exists(&self, path: &Path) -> bool {
        lock(&self.tree).contains(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        lock(&self.tree)
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn create_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        lock(&self.tree)
            .files
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut tree = lock(&self.tree);
        if !tree.contains(path) {
            return Err(not_found(path));
        }
        tree.take(path);
        Ok(())
    }

    fn move_item(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut tree = lock(&self.tree);
        if !tree.contains(from) {
            return Err(not_found(from));
        }
        if tree.contains(to) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        let (files, dirs) = tree.take(from);
        let rebase = |p: &Path| match p.strip_prefix(from) {
            Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
            Ok(rest) => to.join(rest),
            Err(_) => p.to_path_buf(),
        };
        for (path, bytes) in files {
            tree.files.insert(rebase(&path), bytes);
        }
        for dir in dirs {
            tree.dirs.insert(rebase(&dir));
        }
        Ok(())
    }

    fn trash(&self, path: &Path) -> io::Result<PathBuf> {
        if self.fail_trash.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "trash unavailable"));
        }
        let name = path.file_name().ok_or_else(|| not_found(path))?;
        let mut destination = Path::new(FAKE_TRASH_DIR).join(name);
        let mut counter = 1;
        while self.exists(&destination) {
            counter += 1;
            destination = Path::new(FAKE_TRASH_DIR).join(format!("{} {}", name.to_string_lossy(), counter));
        }
        self.move_item(path, &destination)?;
        lock(&self.trashed).push(path.to_path_buf());
        Ok(destination)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = lock(&self.tree);
        if !tree.contains(path) {
            return Err(not_found(path));
        }
        let children: BTreeSet<PathBuf> = tree
            .files
            .keys()
            .chain(tree.dirs.iter())
            .filter_map(|p| p.strip_prefix(path).ok())
            .filter_map(|rest| rest.components().next())
            .map(|first| path.join(first))
            .collect();
        Ok(children.into_iter().collect())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        lock(&self.tree).dirs.insert(path.to_path_buf());
        Ok(())
    }
}

type Responder = Box<dyn Fn(&ToolCommand) -> ProcessOutput + Send + Sync>;

enum Reply {
    /// Played in order; the last one repeats.
    Queue(VecDeque<ProcessOutput>),
    Dynamic(Responder),
}

/// A [`ProcessRunner`] answering from canned replies.
///
/// Replies are matched by substring against the command line. Commands
/// without a matching reply succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    replies: Mutex<Vec<(String, Reply)>>,
    history: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for commands containing `pattern`.
    pub fn respond(&self, pattern: &str, output: ProcessOutput) {
        let mut replies = lock(&self.replies);
        match replies.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, Reply::Queue(queue))) => queue.push_back(output),
            Some((_, reply)) => *reply = Reply::Queue(VecDeque::from([output])),
            None => replies.push((pattern.to_string(), Reply::Queue(VecDeque::from([output])))),
        }
    }

    /// Answer commands containing `pattern` with `responder`, which may
    /// also produce side effects such as files appearing.
    pub fn respond_with<F>(&self, pattern: &str, responder: F)
    where
        F: Fn(&ToolCommand) -> ProcessOutput + Send + Sync + 'static,
    {
        let mut replies = lock(&self.replies);
        replies.retain(|(p, _)| p != pattern);
        replies.push((pattern.to_string(), Reply::Dynamic(Box::new(responder))));
    }

    /// Every command line run so far.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.history).iter().map(|(c, _)| c.clone()).collect()
    }

    /// How many commands contained `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        lock(&self.history)
            .iter()
            .filter(|(c, _)| c.contains(pattern))
            .count()
    }

    /// Standard input sent to commands containing `pattern`.
    pub fn inputs(&self, pattern: &str) -> Vec<Option<String>> {
        lock(&self.history)
            .iter()
            .filter(|(c, _)| c.contains(pattern))
            .map(|(_, input)| input.clone())
            .collect()
    }

    fn answer(&self, command: &ToolCommand) -> ProcessOutput {
        let line = command.to_string();
        lock(&self.history).push((line.clone(), command.input().map(str::to_string)));

        let mut replies = lock(&self.replies);
        let Some((_, reply)) = replies.iter_mut().find(|(p, _)| line.contains(p.as_str())) else {
            return ProcessOutput::default();
        };
        match reply {
            Reply::Queue(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Reply::Queue(queue) => queue.front().cloned().unwrap_or_default(),
            Reply::Dynamic(responder) => responder(command),
        }
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, command: &ToolCommand) -> Result<ProcessOutput, ProcessError> {
        self.answer(command).into_result(command)
    }

    fn run_streaming(
        &self,
        command: &ToolCommand,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, ProcessError> {
        let output = self.answer(command);
        for_each_line(&output.stdout, on_line);
        output.into_result(command)
    }
}

/// A [`TransferStrategy`] that plays a script of outcomes.
///
/// Once the script runs out every transfer succeeds: progress 50% then
/// 100% is reported and the destination is written to the filesystem.
pub struct ScriptedTransfer {
    files: Arc<FakeFileSystem>,
    script: Mutex<VecDeque<Result<(), TransferError>>>,
    tasks: Mutex<Vec<DownloadTask>>,
    contents: Vec<u8>,
}

impl ScriptedTransfer {
    pub fn succeeding(files: Arc<FakeFileSystem>) -> Self {
        Self::failing_with(files, Vec::new())
    }

    pub fn failing_with(files: Arc<FakeFileSystem>, script: Vec<Result<(), TransferError>>) -> Self {
        Self {
            files,
            script: Mutex::new(script.into()),
            tasks: Mutex::new(Vec::new()),
            contents: b"xip archive".to_vec(),
        }
    }

    /// Bytes written to the destination on success.
    pub fn with_contents(mut self, contents: impl AsRef<[u8]>) -> Self {
        self.contents = contents.as_ref().to_vec();
        self
    }

    /// Append outcomes to the script.
    pub fn push(&self, outcome: Result<(), TransferError>) {
        lock(&self.script).push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Resume token handed to each attempt.
    pub fn resume_tokens(&self) -> Vec<Option<ResumeToken>> {
        lock(&self.tasks).iter().map(|t| t.resume_token.clone()).collect()
    }

    /// Cookie header handed to each attempt.
    pub fn cookies(&self) -> Vec<Option<String>> {
        lock(&self.tasks).iter().map(|t| t.cookie_header.clone()).collect()
    }

    /// Attempt number of each call.
    pub fn attempts(&self) -> Vec<usize> {
        lock(&self.tasks).iter().map(|t| t.attempt_number).collect()
    }
}

impl TransferStrategy for ScriptedTransfer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn transfer(
        &self,
        task: &DownloadTask,
        progress: &dyn Fn(TransferProgress),
    ) -> Result<PathBuf, TransferError> {
        lock(&self.tasks).push(task.clone());
        if let Some(Err(error)) = lock(&self.script).pop_front() {
            return Err(error);
        }

        progress(TransferProgress::from_bytes(50, 100));
        progress(TransferProgress::from_bytes(100, 100));
        self.files
            .create_file(&task.destination, &self.contents)
            .map_err(|e| TransferError::new(e.to_string()))?;
        Ok(task.destination.clone())
    }
}

/// An [`OutputSink`] that records everything it is shown.
#[derive(Default)]
pub struct RecordingSink {
    statuses: Mutex<Vec<String>>,
    transfers: Mutex<Vec<(String, TransferProgress)>>,
    finished: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<String> {
        lock(&self.statuses).clone()
    }

    /// Progress labels in the order they were reported.
    pub fn transfer_labels(&self) -> Vec<String> {
        lock(&self.transfers).iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn transfer_percents(&self) -> Vec<u8> {
        lock(&self.transfers).iter().map(|(_, p)| p.percent).collect()
    }

    /// How many transfers were reported finished.
    pub fn finished_transfers(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl OutputSink for RecordingSink {
    fn status(&self, message: &str) {
        lock(&self.statuses).push(message.to_string());
    }

    fn transfer(&self, label: &str, progress: &TransferProgress) {
        lock(&self.transfers).push((label.to_string(), *progress));
    }

    fn transfer_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`Catalog`] holding a fixed list.
pub struct FakeCatalog {
    entries: Mutex<Vec<ArchiveReference>>,
    stale: AtomicBool,
    refreshes: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(entries: Vec<ArchiveReference>) -> Self {
        Self {
            entries: Mutex::new(entries),
            stale: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Report the list as stale until the next refresh.
    pub fn stale(self) -> Self {
        self.stale.store(true, Ordering::SeqCst);
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Catalog for FakeCatalog {
    fn should_refresh(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    fn refresh(&self) -> Result<Vec<ArchiveReference>, CatalogError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.stale.store(false, Ordering::SeqCst);
        Ok(self.available())
    }

    fn available(&self) -> Vec<ArchiveReference> {
        lock(&self.entries).clone()
    }
}

/// A [`SessionProvider`] that is either signed in or not.
pub struct FakeSession {
    cookie: Option<String>,
    validations: AtomicUsize,
}

impl FakeSession {
    pub fn signed_in(cookie: &str) -> Self {
        Self {
            cookie: Some(cookie.to_string()),
            validations: AtomicUsize::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            cookie: None,
            validations: AtomicUsize::new(0),
        }
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

impl SessionProvider for FakeSession {
    fn validate(&self) -> InstallResult<()> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        match self.cookie {
            Some(_) => Ok(()),
            None => Err(InstallError::MissingCredential),
        }
    }

    fn cookies_for(&self, _url: &str) -> Option<String> {
        self.cookie.clone()
    }
}

/// A [`PasswordPrompt`] with a fixed answer.
pub struct FakePrompt {
    password: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakePrompt {
    pub fn with_password(password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A prompt the user dismisses.
    pub fn empty() -> Self {
        Self {
            password: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompt texts shown so far.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl PasswordPrompt for FakePrompt {
    fn read_password(&self, prompt: &str) -> Option<String> {
        lock(&self.prompts).push(prompt.to_string());
        self.password.clone()
    }
}
