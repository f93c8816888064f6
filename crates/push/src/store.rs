//! Read-only access to the local Nix store.

use crate::error::StoreError;
use async_trait::async_trait;
use ferry_core::hash::NarHash;
use ferry_core::narinfo::UNKNOWN_DERIVER;
use ferry_core::store_path::{StoreDir, StorePath};
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

const MAX_SYMLINK_HOPS: usize = 40;

/// What the store has on record for a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathInfo {
    pub nar_hash: NarHash,
    pub nar_size: u64,
    pub deriver: Option<StorePath>,
    /// Direct references, possibly including the path itself.
    pub references: Vec<StorePath>,
}

/// A running NAR serialization.
///
/// `reader` yields the NAR bytes. `exit` resolves once the producer has
/// finished and must only be awaited after `reader` hit EOF. Dropping either
/// half before completion stops the producer.
pub struct NarDump {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub exit: BoxFuture<'static, Result<(), StoreError>>,
}

/// The store operations a push needs.
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve symlinks until the path is inside the store, then return the
    /// top-level store path containing it.
    async fn follow_links_to_store_path(&self, path: &Path) -> Result<StorePath, StoreError>;

    async fn query_path_info(&self, path: &StorePath) -> Result<PathInfo, StoreError>;

    /// Transitive closure of `paths`, including the paths themselves.
    async fn compute_closure(&self, paths: &[StorePath]) -> Result<BTreeSet<StorePath>, StoreError>;

    /// Start serializing `path` as a NAR.
    async fn dump_nar(&self, path: &StorePath) -> Result<NarDump, StoreError>;
}

/// [`Store`] backed by the `nix-store` command.
#[derive(Clone, Debug)]
pub struct NixStore {
    program: PathBuf,
    store_dir: StoreDir,
}

impl NixStore {
    pub const DEFAULT_PROGRAM: &'static str = "nix-store";

    pub fn new(store_dir: StoreDir) -> Self {
        Self::with_program(Self::DEFAULT_PROGRAM, store_dir)
    }

    /// Use a specific `nix-store` binary.
    pub fn with_program(program: impl Into<PathBuf>, store_dir: StoreDir) -> Self {
        Self {
            program: program.into(),
            store_dir,
        }
    }

    pub fn store_dir(&self) -> &StoreDir {
        &self.store_dir
    }

    fn command_name(&self, args: &[&str]) -> String {
        format!("{} {}", self.program.display(), args.join(" "))
    }

    async fn run(&self, args: &[&str], paths: &[String]) -> Result<String, StoreError> {
        let command = self.command_name(args);
        let output = Command::new(&self.program)
            .args(args)
            .args(paths)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| StoreError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(StoreError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| StoreError::UnexpectedOutput {
            command,
            message: format!("not UTF-8: {e}"),
        })
    }

    async fn query_one(&self, flag: &str, path: &StorePath) -> Result<String, StoreError> {
        let output = self
            .run(&["--query", flag], &[path.to_path_string()])
            .await?;
        Ok(output.trim().to_string())
    }

    fn parse_paths(&self, output: &str) -> Result<Vec<StorePath>, StoreError> {
        output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| self.store_dir.parse_path(line).map_err(StoreError::from))
            .collect()
    }

    /// The top-level store path containing `path`, if it lies in the store.
    fn store_path_prefix(&self, path: &Path) -> Result<Option<StorePath>, StoreError> {
        let Ok(rest) = path.strip_prefix(self.store_dir.as_str()) else {
            return Ok(None);
        };
        match rest.components().next() {
            Some(Component::Normal(entry)) => {
                let basename = entry
                    .to_str()
                    .ok_or_else(|| StoreError::NotInStore(path.display().to_string()))?;
                Ok(Some(StorePath::from_basename_in(
                    self.store_dir.clone(),
                    basename,
                )?))
            }
            _ => Err(StoreError::NotInStore(path.display().to_string())),
        }
    }
}

#[async_trait]
impl Store for NixStore {
    async fn follow_links_to_store_path(&self, path: &Path) -> Result<StorePath, StoreError> {
        let mut current = canon_path(&std::path::absolute(path)?);
        for _ in 0..MAX_SYMLINK_HOPS {
            if let Some(store_path) = self.store_path_prefix(&current)? {
                return Ok(store_path);
            }
            let metadata = tokio::fs::symlink_metadata(&current).await?;
            if !metadata.file_type().is_symlink() {
                break;
            }
            let target = tokio::fs::read_link(&current).await?;
            current = canon_path(&match current.parent() {
                Some(parent) => parent.join(target),
                None => target,
            });
        }
        Err(StoreError::NotInStore(path.display().to_string()))
    }

    async fn query_path_info(&self, path: &StorePath) -> Result<PathInfo, StoreError> {
        let (hash, size, deriver, references) = tokio::try_join!(
            self.query_one("--hash", path),
            self.query_one("--size", path),
            self.query_one("--deriver", path),
            self.query_one("--references", path),
        )?;

        let nar_hash = NarHash::parse(&hash)?;
        let nar_size = size.parse().map_err(|e| StoreError::UnexpectedOutput {
            command: self.command_name(&["--query", "--size"]),
            message: format!("invalid size '{size}': {e}"),
        })?;
        let deriver = if deriver.is_empty() || deriver == UNKNOWN_DERIVER {
            None
        } else {
            Some(self.store_dir.parse_path(&deriver)?)
        };

        Ok(PathInfo {
            nar_hash,
            nar_size,
            deriver,
            references: self.parse_paths(&references)?,
        })
    }

    async fn compute_closure(&self, paths: &[StorePath]) -> Result<BTreeSet<StorePath>, StoreError> {
        if paths.is_empty() {
            return Ok(BTreeSet::new());
        }
        let args: Vec<String> = paths.iter().map(StorePath::to_path_string).collect();
        let output = self.run(&["--query", "--requisites"], &args).await?;
        Ok(self.parse_paths(&output)?.into_iter().collect())
    }

    async fn dump_nar(&self, path: &StorePath) -> Result<NarDump, StoreError> {
        let command = self.command_name(&["--dump"]);
        let mut child = Command::new(&self.program)
            .arg("--dump")
            .arg(path.to_path_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StoreError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| StoreError::UnexpectedOutput {
            command: command.clone(),
            message: "stdout was not captured".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| StoreError::UnexpectedOutput {
            command: command.clone(),
            message: "stderr was not captured".to_string(),
        })?;

        // Drain stderr concurrently so a chatty producer cannot block.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await?;
            Ok::<Vec<u8>, std::io::Error>(buf)
        });

        let exit: BoxFuture<'static, Result<(), StoreError>> = Box::pin(async move {
            let status = child.wait().await?;
            let stderr = stderr_task.await.map_err(std::io::Error::other)??;
            if !status.success() {
                return Err(StoreError::CommandFailed {
                    command,
                    status: status.to_string(),
                    stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                });
            }
            Ok(())
        });

        Ok(NarDump {
            reader: Box::new(stdout),
            exit,
        })
    }
}

/// Drop `.` and resolve `..` lexically; `..` at the root stays at the root.
fn canon_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
