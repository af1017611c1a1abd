//! Validated, atomic rule file persistence.
//!
//! Every write runs the same sequence:
//!
//! ```text
//! Serialize -> [Validate] -> Backup -> WriteAtomic -> Commit
//!                                  \-> Restore (on any failure after Backup)
//! ```
//!
//! Validation stages the content in a temporary file outside the rule
//! directory, so a rejected document never touches the live file or the
//! backup. Writes go to `<file>.tmp` and are renamed into place. One backup
//! generation is kept per group at `<backup_dir>/group-<id>.yml.bak`.
//!
//! Writes for the same group are serialized by a per-group async lock;
//! different groups proceed in parallel.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use aami_core::GroupId;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::config::RulesConfig;
use crate::document::{RuleDocument, group_from_file_name, rule_file_name};
use crate::error::{Result, RuleError, WriteStage};

const TEMP_SUFFIX: &str = ".tmp";
const RESTORE_SUFFIX: &str = ".restore";
const BACKUP_SUFFIX: &str = ".bak";

/// External rule validator.
#[allow(async_fn_in_trait)]
pub trait RuleValidator: Send + Sync {
    /// Checks the rule file at `path`. Returns diagnostics on rejection.
    fn validate(
        &self,
        path: &Path,
    ) -> impl std::future::Future<Output = std::result::Result<(), String>> + Send;
}

/// Runs `<binary> check rules <file>` with a timeout.
#[derive(Debug, Clone)]
pub struct PromtoolValidator {
    binary: PathBuf,
    timeout: Duration,
}

impl PromtoolValidator {
    /// Creates a validator for the given binary.
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Returns the validator binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl RuleValidator for PromtoolValidator {
    async fn validate(&self, path: &Path) -> std::result::Result<(), String> {
        let mut command = Command::new(&self.binary);
        command.arg("check").arg("rules").arg(path).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(format!("failed to run {}: {e}", self.binary.display()));
            }
            Err(_) => {
                return Err(format!(
                    "{} timed out after {}s",
                    self.binary.display(),
                    self.timeout.as_secs()
                ));
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(format!("{}: {}", output.status, diagnostics.trim()))
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// The group written.
    pub group_id: GroupId,
    /// The live rule file.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: usize,
    /// Backup of the previous content, if one was taken.
    pub backup: Option<PathBuf>,
}

/// Writes, deletes, backs up and restores per-group rule files.
pub struct RuleFileWriter<V = PromtoolValidator> {
    rule_dir: PathBuf,
    backup_dir: Option<PathBuf>,
    validator: Option<V>,
    locks: Mutex<HashMap<GroupId, Arc<AsyncMutex<()>>>>,
}

impl RuleFileWriter<PromtoolValidator> {
    /// Creates a writer with no validator and no backups.
    pub fn new(rule_dir: impl Into<PathBuf>) -> Self {
        Self {
            rule_dir: rule_dir.into(),
            backup_dir: None,
            validator: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a writer from configuration.
    ///
    /// The validator is resolved once here; if validation is enabled but no
    /// binary is found, validation stays off.
    #[must_use]
    pub fn from_config(config: &RulesConfig) -> Self {
        let validator = config
            .resolve_validator()
            .map(|binary| PromtoolValidator::new(binary, config.validation_timeout()));
        Self {
            rule_dir: config.rule_path.clone(),
            backup_dir: config.backup_dir(),
            validator,
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: RuleValidator> RuleFileWriter<V> {
    /// Enables backups into `dir`.
    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Replaces the validator.
    #[must_use]
    pub fn with_validator<W: RuleValidator>(self, validator: W) -> RuleFileWriter<W> {
        RuleFileWriter {
            rule_dir: self.rule_dir,
            backup_dir: self.backup_dir,
            validator: Some(validator),
            locks: self.locks,
        }
    }

    /// Returns the rule directory.
    #[must_use]
    pub fn rule_dir(&self) -> &Path {
        &self.rule_dir
    }

    /// Returns true if documents are validated before they are written.
    #[must_use]
    pub fn validation_enabled(&self) -> bool {
        self.validator.is_some()
    }

    /// Returns the live rule file path for a group.
    #[must_use]
    pub fn file_path(&self, group_id: &GroupId) -> PathBuf {
        self.rule_dir.join(rule_file_name(group_id))
    }

    /// Returns the backup path for a group, or `None` when backups are off.
    #[must_use]
    pub fn backup_path(&self, group_id: &GroupId) -> Option<PathBuf> {
        self.backup_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}{BACKUP_SUFFIX}", rule_file_name(group_id))))
    }

    fn group_lock(&self, group_id: &GroupId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks.lock().entry(group_id.clone()).or_default())
    }

    /// Drops the caller's handle and forgets the lock if nobody else holds it.
    fn release_group_lock(&self, group_id: &GroupId, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks
            .get(group_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(group_id);
        }
    }

    // ============ Write ============

    /// Validates and atomically writes a group's rule file.
    ///
    /// # Errors
    ///
    /// - `RuleError::Marshal` if the document cannot be serialized
    /// - `RuleError::Validation` if the validator rejects it (nothing on disk
    ///   is touched)
    /// - `RuleError::Write` at `Backup`, `WriteAtomic` or `Commit`; after a
    ///   failure past `Backup` the previous content is restored first
    pub async fn write_rules(
        &self,
        group_id: &GroupId,
        document: &RuleDocument,
    ) -> Result<WriteReport> {
        let path = self.file_path(group_id);
        let content = document.to_yaml().map_err(|source| RuleError::Marshal {
            group_id: group_id.clone(),
            source,
        })?;

        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        if let Some(validator) = &self.validator {
            self.validate_content(group_id, validator, &content).await?;
        }

        let previous = read_optional(&path)
            .await
            .map_err(|source| write_error(group_id, WriteStage::Backup, &path, source))?;
        let backup = self.store_backup(group_id, previous.as_deref()).await?;

        if let Err(source) = write_atomic(&path, content.as_bytes(), TEMP_SUFFIX).await {
            self.roll_back(group_id, &path, previous.as_deref()).await;
            return Err(write_error(group_id, WriteStage::WriteAtomic, &path, source));
        }

        let committed = match fs::read(&path).await {
            Ok(bytes) if bytes == content.as_bytes() => Ok(()),
            Ok(_) => Err(io::Error::other("content on disk differs from content written")),
            Err(e) => Err(e),
        };
        if let Err(source) = committed {
            self.roll_back(group_id, &path, previous.as_deref()).await;
            return Err(write_error(group_id, WriteStage::Commit, &path, source));
        }

        info!(
            group_id = %group_id,
            file = %path.display(),
            rule_count = document.rule_count(),
            bytes = content.len(),
            "rule file written"
        );
        Ok(WriteReport {
            group_id: group_id.clone(),
            path,
            bytes: content.len(),
            backup,
        })
    }

    async fn validate_content(&self, group_id: &GroupId, validator: &V, content: &str) -> Result<()> {
        let staged = stage_for_validation(content).await.map_err(|source| {
            write_error(group_id, WriteStage::Validate, &std::env::temp_dir(), source)
        })?;

        match validator.validate(staged.path()).await {
            Ok(()) => {
                debug!(group_id = %group_id, "rule validation passed");
                Ok(())
            }
            Err(output) => {
                warn!(group_id = %group_id, output = %output, "rule validation failed");
                Err(RuleError::Validation {
                    group_id: group_id.clone(),
                    output,
                })
            }
        }
    }

    async fn store_backup(
        &self,
        group_id: &GroupId,
        previous: Option<&[u8]>,
    ) -> Result<Option<PathBuf>> {
        let (Some(bytes), Some(backup_path)) = (previous, self.backup_path(group_id)) else {
            return Ok(None);
        };
        write_atomic(&backup_path, bytes, TEMP_SUFFIX)
            .await
            .map_err(|source| write_error(group_id, WriteStage::Backup, &backup_path, source))?;
        debug!(group_id = %group_id, backup = %backup_path.display(), "backup taken");
        Ok(Some(backup_path))
    }

    async fn roll_back(&self, group_id: &GroupId, path: &Path, previous: Option<&[u8]>) {
        let _ = fs::remove_file(sibling(path, TEMP_SUFFIX)).await;

        let restored = match previous {
            Some(bytes) => write_atomic(path, bytes, RESTORE_SUFFIX).await,
            None => match fs::remove_file(path).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        match restored {
            Ok(()) => warn!(group_id = %group_id, "rule write rolled back"),
            Err(e) => error!(
                group_id = %group_id,
                file = %path.display(),
                error = %e,
                "rollback failed, rule file may be inconsistent"
            ),
        }
    }

    // ============ Delete, backup, restore ============

    /// Deletes a group's rule file, backing it up first.
    ///
    /// Returns `false` if there was no file.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Delete` if the backup or the removal fails.
    pub async fn delete_rules(&self, group_id: &GroupId) -> Result<bool> {
        let lock = self.group_lock(group_id);
        let deleted = {
            let _guard = lock.lock().await;
            self.delete_locked(group_id).await
        };
        self.release_group_lock(group_id, lock);
        deleted
    }

    async fn delete_locked(&self, group_id: &GroupId) -> Result<bool> {
        let path = self.file_path(group_id);
        let delete_error = |path: &Path, source| RuleError::Delete {
            group_id: group_id.clone(),
            path: path.to_path_buf(),
            source,
        };

        let Some(previous) = read_optional(&path)
            .await
            .map_err(|source| delete_error(&path, source))?
        else {
            debug!(group_id = %group_id, "no rule file to delete");
            return Ok(false);
        };

        if let Some(backup_path) = self.backup_path(group_id) {
            write_atomic(&backup_path, &previous, TEMP_SUFFIX)
                .await
                .map_err(|source| delete_error(&backup_path, source))?;
        }
        fs::remove_file(&path)
            .await
            .map_err(|source| delete_error(&path, source))?;

        info!(group_id = %group_id, file = %path.display(), "rule file deleted");
        Ok(true)
    }

    /// Copies the current rule file to the backup location.
    ///
    /// Returns `None` if backups are off or there is no file.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Write` at the `Backup` stage.
    pub async fn backup(&self, group_id: &GroupId) -> Result<Option<PathBuf>> {
        let path = self.file_path(group_id);
        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        let previous = read_optional(&path)
            .await
            .map_err(|source| write_error(group_id, WriteStage::Backup, &path, source))?;
        self.store_backup(group_id, previous.as_deref()).await
    }

    /// Replaces the live rule file with the retained backup.
    ///
    /// # Errors
    ///
    /// - `RuleError::NoBackup` if backups are off or none exists
    /// - `RuleError::Write` at the `Restore` stage
    pub async fn restore(&self, group_id: &GroupId) -> Result<()> {
        let no_backup = || RuleError::NoBackup {
            group_id: group_id.clone(),
        };
        let backup_path = self.backup_path(group_id).ok_or_else(no_backup)?;
        let path = self.file_path(group_id);

        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        let bytes = read_optional(&backup_path)
            .await
            .map_err(|source| write_error(group_id, WriteStage::Restore, &backup_path, source))?
            .ok_or_else(no_backup)?;
        write_atomic(&path, &bytes, RESTORE_SUFFIX)
            .await
            .map_err(|source| write_error(group_id, WriteStage::Restore, &path, source))?;

        info!(group_id = %group_id, backup = %backup_path.display(), "rule file restored from backup");
        Ok(())
    }

    /// Returns the groups that currently have a rule file, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::List` if the directory cannot be read.
    pub async fn list_rule_files(&self) -> Result<Vec<GroupId>> {
        let list_error = |source| RuleError::List {
            path: self.rule_dir.clone(),
            source,
        };

        let mut entries = match fs::read_dir(&self.rule_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_error(e)),
        };

        let mut groups = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
            if let Some(group) = entry.file_name().to_str().and_then(group_from_file_name) {
                groups.push(group);
            }
        }
        groups.sort();
        Ok(groups)
    }
}

fn write_error(group_id: &GroupId, stage: WriteStage, path: &Path, source: io::Error) -> RuleError {
    RuleError::Write {
        group_id: group_id.clone(),
        stage,
        path: path.to_path_buf(),
        source,
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Writes `bytes` to `<path><suffix>`, syncs it, and renames it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8], suffix: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let temp = sibling(path, suffix);
    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }

    fs::rename(&temp, path).await
}

async fn stage_for_validation(content: &str) -> io::Result<tempfile::NamedTempFile> {
    let content = content.to_owned();
    tokio::task::spawn_blocking(move || {
        let mut staged = tempfile::Builder::new()
            .prefix("aami-rules-")
            .suffix(".yml")
            .tempfile()?;
        staged.write_all(content.as_bytes())?;
        staged.flush()?;
        Ok::<_, io::Error>(staged)
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Rule;
    use aami_core::ErrorKind;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn g(id: &str) -> GroupId {
        GroupId::from_string(id).unwrap()
    }

    fn doc(expr: &str) -> RuleDocument {
        RuleDocument::single(
            "group_web_g1",
            vec![Rule {
                alert: "A_Group_g1".to_string(),
                expr: expr.to_string(),
                for_duration: None,
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            }],
        )
    }

    fn writer(dir: &TempDir) -> RuleFileWriter {
        RuleFileWriter::new(dir.path().join("rules")).with_backup_dir(dir.path().join("backup"))
    }

    fn validator(binary: &str) -> PromtoolValidator {
        PromtoolValidator::new(binary, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn write_creates_file_and_backs_up_previous() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let group = g("g1");

        let first = w.write_rules(&group, &doc("up == 0")).await.unwrap();
        assert_eq!(first.backup, None);
        let first_bytes = std::fs::read(&first.path).unwrap();
        assert_eq!(first_bytes, doc("up == 0").to_yaml().unwrap().into_bytes());

        let second = w.write_rules(&group, &doc("up == 1")).await.unwrap();
        let backup = second.backup.unwrap();
        assert_eq!(std::fs::read(backup).unwrap(), first_bytes);
        assert!(!sibling(&second.path, TEMP_SUFFIX).exists());
    }

    #[tokio::test]
    async fn rejected_validation_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let group = g("g1");
        let w = writer(&dir);
        w.write_rules(&group, &doc("up == 0")).await.unwrap();
        let before = std::fs::read(w.file_path(&group)).unwrap();

        let w = w.with_validator(validator("/bin/false"));
        let err = w.write_rules(&group, &doc("broken(")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RuleGenerationFailed);
        assert_eq!(err.stage(), Some(WriteStage::Validate));
        assert_eq!(std::fs::read(w.file_path(&group)).unwrap(), before);
        assert!(!w.backup_path(&group).unwrap().exists());
    }

    #[tokio::test]
    async fn accepted_validation_writes() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir).with_validator(validator("/bin/true"));
        assert!(w.validation_enabled());
        w.write_rules(&g("g1"), &doc("up == 0")).await.unwrap();
        assert!(w.file_path(&g("g1")).exists());
    }

    #[tokio::test]
    async fn missing_validator_binary_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir).with_validator(validator("/nonexistent/promtool"));
        let err = w.write_rules(&g("g1"), &doc("up == 0")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuleGenerationFailed);
        assert!(!w.file_path(&g("g1")).exists());
    }

    #[tokio::test]
    async fn failed_atomic_write_leaves_previous_file_intact() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let group = g("g1");
        w.write_rules(&group, &doc("up == 0")).await.unwrap();
        let path = w.file_path(&group);
        let before = std::fs::read(&path).unwrap();

        // A directory squatting on the temp path makes the write step fail.
        std::fs::create_dir(sibling(&path, TEMP_SUFFIX)).unwrap();

        let err = w.write_rules(&group, &doc("up == 1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuleWriteFailed);
        assert_eq!(err.stage(), Some(WriteStage::WriteAtomic));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn failed_first_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let group = g("g1");
        let path = w.file_path(&group);
        std::fs::create_dir_all(sibling(&path, TEMP_SUFFIX)).unwrap();

        assert!(w.write_rules(&group, &doc("up == 0")).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_backup_leaves_live_file_intact() {
        let dir = tempfile::tempdir().unwrap();
        let group = g("g1");
        let w = writer(&dir);
        w.write_rules(&group, &doc("up == 0")).await.unwrap();
        let path = w.file_path(&group);
        let before = std::fs::read(&path).unwrap();

        // A regular file where the backup directory should be.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let w = w.with_backup_dir(&blocker);

        let err = w.write_rules(&group, &doc("up == 1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuleWriteFailed);
        assert_eq!(err.stage(), Some(WriteStage::Backup));
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(!sibling(&path, TEMP_SUFFIX).exists());

        let err = w.delete_rules(&group).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuleDeleteFailed);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn delete_forgets_idle_group_lock() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let group = g("g1");
        w.write_rules(&group, &doc("up == 0")).await.unwrap();
        assert!(w.locks.lock().contains_key(&group));

        w.delete_rules(&group).await.unwrap();
        assert!(!w.locks.lock().contains_key(&group));
    }

    #[tokio::test]
    async fn delete_backs_up_then_removes() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let group = g("g1");
        w.write_rules(&group, &doc("up == 0")).await.unwrap();
        let content = std::fs::read(w.file_path(&group)).unwrap();

        assert!(w.delete_rules(&group).await.unwrap());
        assert!(!w.file_path(&group).exists());
        assert_eq!(std::fs::read(w.backup_path(&group).unwrap()).unwrap(), content);

        assert!(!w.delete_rules(&group).await.unwrap());
    }

    #[tokio::test]
    async fn restore_brings_back_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let group = g("g1");
        w.write_rules(&group, &doc("up == 0")).await.unwrap();
        let first = std::fs::read(w.file_path(&group)).unwrap();
        w.write_rules(&group, &doc("up == 1")).await.unwrap();

        w.restore(&group).await.unwrap();
        assert_eq!(std::fs::read(w.file_path(&group)).unwrap(), first);
    }

    #[tokio::test]
    async fn restore_without_backup_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let err = w.restore(&g("g1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let no_backups = RuleFileWriter::new(dir.path().join("rules"));
        assert!(matches!(
            no_backups.restore(&g("g1")).await,
            Err(RuleError::NoBackup { .. })
        ));
    }

    #[tokio::test]
    async fn explicit_backup_copies_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        let group = g("g1");
        assert_eq!(w.backup(&group).await.unwrap(), None);

        w.write_rules(&group, &doc("up == 0")).await.unwrap();
        let backup = w.backup(&group).await.unwrap().unwrap();
        assert_eq!(
            std::fs::read(backup).unwrap(),
            std::fs::read(w.file_path(&group)).unwrap()
        );
    }

    #[tokio::test]
    async fn list_rule_files_ignores_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(&dir);
        assert!(w.list_rule_files().await.unwrap().is_empty());

        w.write_rules(&g("b"), &doc("up == 0")).await.unwrap();
        w.write_rules(&g("a"), &doc("up == 0")).await.unwrap();
        std::fs::write(w.rule_dir().join("notes.txt"), "x").unwrap();
        std::fs::write(w.rule_dir().join("group-c.yml.tmp"), "x").unwrap();

        assert_eq!(w.list_rule_files().await.unwrap(), vec![g("a"), g("b")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_one_group_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let w = Arc::new(writer(&dir));
        let group = g("g1");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let w = Arc::clone(&w);
                let group = group.clone();
                tokio::spawn(async move { w.write_rules(&group, &doc(&format!("up == {i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let candidates: Vec<Vec<u8>> = (0..16)
            .map(|i| doc(&format!("up == {i}")).to_yaml().unwrap().into_bytes())
            .collect();
        let live = std::fs::read(w.file_path(&group)).unwrap();
        let backup = std::fs::read(w.backup_path(&group).unwrap()).unwrap();
        assert!(candidates.contains(&live));
        assert!(candidates.contains(&backup));
        assert_ne!(live, backup);
        assert!(!sibling(&w.file_path(&group), TEMP_SUFFIX).exists());
    }
}
