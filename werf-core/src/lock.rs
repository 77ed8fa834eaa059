//! Named advisory locks.
//!
//! Each lock name maps to a file under the lock store; cooperating processes
//! on the same host serialize through flock on that file. Within one
//! manager, acquisition is reentrant: re-acquiring a held name only bumps a
//! depth counter. Guards release on drop, so every exit path unlocks.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, WerfError};

/// Timeout applied at every lock acquisition site inside the conveyor.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_START: Duration = Duration::from_millis(50);
const POLL_MAX: Duration = Duration::from_millis(500);

/// Options for a single acquisition.
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// `None` blocks until the lock is granted.
    pub timeout: Option<Duration>,
    /// Shared (read) lock instead of the default exclusive one.
    pub shared: bool,
}

impl LockOptions {
    pub fn with_default_timeout() -> Self {
        Self { timeout: Some(DEFAULT_LOCK_TIMEOUT), shared: false }
    }
}

struct HeldLock {
    file: File,
    depth: usize,
}

struct LockManagerInner {
    locks_dir: PathBuf,
    held: RefCell<HashMap<String, HeldLock>>,
}

/// Process-wide named lock manager. Cheap to clone; clones share state and
/// therefore the reentrancy accounting.
#[derive(Clone)]
pub struct LockManager {
    inner: Rc<LockManagerInner>,
}

/// Balanced-release handle for one acquisition.
pub struct LockGuard {
    manager: LockManager,
    name: String,
}

impl LockManager {
    /// Create a manager over `locks_dir`, creating the directory if needed.
    /// Failure to initialize the backing store is fatal.
    pub fn new(locks_dir: impl Into<PathBuf>) -> Result<Self> {
        let locks_dir = locks_dir.into();
        std::fs::create_dir_all(&locks_dir)
            .map_err(|e| WerfError::LockStoreInit { path: locks_dir.clone(), source: e })?;

        Ok(Self {
            inner: Rc::new(LockManagerInner { locks_dir, held: RefCell::new(HashMap::new()) }),
        })
    }

    /// Block until the named lock is granted or `opts.timeout` expires.
    pub fn acquire(&self, name: &str, opts: LockOptions) -> Result<LockGuard> {
        {
            let mut held = self.inner.held.borrow_mut();
            if let Some(lock) = held.get_mut(name) {
                lock.depth += 1;
                debug!("lock {} re-entered (depth {})", name, lock.depth);
                return Ok(LockGuard { manager: self.clone(), name: name.to_string() });
            }
        }

        let path = self.lock_file_path(name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| WerfError::io(&path, e))?;

        match opts.timeout {
            None => {
                let res = if opts.shared {
                    FileExt::lock_shared(&file)
                } else {
                    FileExt::lock_exclusive(&file)
                };
                res.map_err(|e| WerfError::io(&path, e))?;
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                let mut delay = POLL_START;
                loop {
                    let res = if opts.shared {
                        FileExt::try_lock_shared(&file)
                    } else {
                        FileExt::try_lock_exclusive(&file)
                    };
                    match res {
                        Ok(()) => break,
                        Err(_) if Instant::now() < deadline => {
                            std::thread::sleep(delay.min(deadline - Instant::now()));
                            delay = (delay * 2).min(POLL_MAX);
                        }
                        Err(_) => {
                            return Err(WerfError::LockTimeout {
                                name: name.to_string(),
                                timeout_secs: timeout.as_secs(),
                            });
                        }
                    }
                }
            }
        }

        debug!("lock {} acquired", name);
        self.inner.held.borrow_mut().insert(name.to_string(), HeldLock { file, depth: 1 });

        Ok(LockGuard { manager: self.clone(), name: name.to_string() })
    }

    /// Run `f` under the named lock.
    pub fn with_lock<T>(
        &self,
        name: &str,
        opts: LockOptions,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let _guard = self.acquire(name, opts)?;
        f()
    }

    fn release(&self, name: &str) {
        let mut held = self.inner.held.borrow_mut();
        let Some(lock) = held.get_mut(name) else { return };

        lock.depth -= 1;
        if lock.depth == 0 {
            let lock = held.remove(name).expect("held lock present");
            let _ = fs2::FileExt::unlock(&lock.file);
            debug!("lock {} released", name);
        }
    }

    /// Lock names contain arbitrary text (paths, image tags); the file name
    /// is a readable prefix plus a digest of the full name so distinct names
    /// never collide.
    fn lock_file_path(&self, name: &str) -> PathBuf {
        let sanitized: String = name
            .chars()
            .take(64)
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        self.inner.locks_dir.join(format!("{}.{}.lock", sanitized, &digest[..8]))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(dir: &std::path::Path) -> LockManager {
        LockManager::new(dir).unwrap()
    }

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let guard = locks.acquire("demo.image.stage", LockOptions::default()).unwrap();
        drop(guard);

        // Releasable means re-acquirable from a second manager.
        let other = manager(dir.path());
        let _guard = other
            .acquire("demo.image.stage", LockOptions { timeout: Some(Duration::from_millis(200)), shared: false })
            .unwrap();
    }

    #[test]
    fn reentrant_within_one_manager() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let outer = locks.acquire("nested", LockOptions::with_default_timeout()).unwrap();
        let inner = locks.acquire("nested", LockOptions::with_default_timeout()).unwrap();
        drop(inner);

        // Still held by the outer guard: a second manager must time out.
        let other = manager(dir.path());
        let contended = other
            .acquire("nested", LockOptions { timeout: Some(Duration::from_millis(150)), shared: false });
        assert!(matches!(contended, Err(WerfError::LockTimeout { .. })));

        drop(outer);
        let _granted = other
            .acquire("nested", LockOptions { timeout: Some(Duration::from_millis(500)), shared: false })
            .unwrap();
    }

    #[test]
    fn with_lock_releases_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let result: Result<()> = locks.with_lock(
            "scoped",
            LockOptions::with_default_timeout(),
            || Err(WerfError::docker("boom")),
        );
        assert!(result.is_err());

        let other = manager(dir.path());
        let _guard = other
            .acquire("scoped", LockOptions { timeout: Some(Duration::from_millis(200)), shared: false })
            .unwrap();
    }

    #[test]
    fn contention_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();

        let locks = manager(&dir_path);
        let guard = locks.acquire("contended", LockOptions::with_default_timeout()).unwrap();

        let contender_dir = dir_path.clone();
        let handle = std::thread::spawn(move || {
            let locks = LockManager::new(&contender_dir).unwrap();
            let started = Instant::now();
            let _guard = locks
                .acquire(
                    "contended",
                    LockOptions { timeout: Some(Duration::from_secs(5)), shared: false },
                )
                .unwrap();
            started.elapsed()
        });

        std::thread::sleep(Duration::from_millis(300));
        drop(guard);

        let waited = handle.join().unwrap();
        assert!(waited >= Duration::from_millis(200), "contender acquired too early: {:?}", waited);
    }

    #[test]
    fn shared_locks_do_not_exclude_each_other() {
        let dir = tempfile::tempdir().unwrap();

        let a = manager(dir.path());
        let b = manager(dir.path());

        let opts = LockOptions { timeout: Some(Duration::from_millis(300)), shared: true };
        let _ga = a.acquire("shared-name", opts.clone()).unwrap();
        let _gb = b.acquire("shared-name", opts).unwrap();
    }

    #[test]
    fn distinct_names_never_collide_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path());

        let a = locks.lock_file_path("git_work_tree /a/b");
        let b = locks.lock_file_path("git_work_tree /a_b");
        assert_ne!(a, b);
    }
}
