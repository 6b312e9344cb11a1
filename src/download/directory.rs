//! Target-directory preparation: conflict detection and action resolution.
//!
//! Before an adapter writes anything it asks this module what to do with
//! the target directory. The resolution depends on what is already there
//! (nothing, a previous download with its witness manifest, or unrelated
//! files) and on whether the run may prompt the user.
//!
//! | Directory state | Interactive | Non-interactive |
//! |---|---|---|
//! | does not exist | proceed | proceed |
//! | exists, empty | proceed | skip |
//! | exists with witness | prompt | merge |
//! | exists with other files | prompt | skip |

use std::path::Path;

use tracing::{debug, warn};

use super::error::DownloadError;
use super::witness::WITNESS_FILENAME;

/// Maximum conflicting paths reported by a scan.
const MAX_REPORTED_CONFLICTS: usize = 100;

/// Resolution for a download-target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write into the directory (creating it if needed).
    Proceed,
    /// Do not download; leave the directory untouched.
    Skip,
    /// Keep existing files and write new ones alongside.
    Merge,
    /// Remove existing contents, then write.
    Overwrite,
    /// Abort the whole request with an error.
    Abort,
}

/// What the conflict scan found.
#[derive(Debug, Clone)]
pub struct Preparation {
    /// Resolved action.
    pub action: Action,
    /// Up to 100 conflicting relative paths (witness excluded).
    pub conflicts: Vec<String>,
    /// True when a witness manifest from a previous download is present.
    pub has_witness: bool,
    /// Free bytes on the target volume; `None` when undeterminable.
    pub available_space: Option<u64>,
}

/// Supplies the interactive conflict decision.
///
/// The CLI implementation reads a single choice from the terminal; tests
/// supply canned answers.
pub trait ConflictPrompter: Send + Sync {
    /// Asks the user how to treat an existing directory.
    fn resolve_conflict(&self, dir: &Path, conflicts: &[String], has_witness: bool) -> Action;
}

/// Prompter that always answers with a fixed action.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompter(pub Action);

impl ConflictPrompter for FixedPrompter {
    fn resolve_conflict(&self, _dir: &Path, _conflicts: &[String], _has_witness: bool) -> Action {
        self.0
    }
}

/// Prompter that asks on the terminal with a single-letter menu.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

impl ConflictPrompter for StdinPrompter {
    fn resolve_conflict(&self, dir: &Path, conflicts: &[String], has_witness: bool) -> Action {
        use std::io::{BufRead, Write};

        if has_witness {
            eprintln!("{} already holds a downloaded dataset.", dir.display());
        } else {
            eprintln!(
                "{} already contains {} file(s):",
                dir.display(),
                conflicts.len()
            );
            for path in conflicts.iter().take(5) {
                eprintln!("  {path}");
            }
            if conflicts.len() > 5 {
                eprintln!("  ... and {} more", conflicts.len() - 5);
            }
        }
        eprint!("[s]kip / [m]erge / [o]verwrite / [a]bort? ");
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return Action::Abort;
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "m" | "merge" => Action::Merge,
            "o" | "overwrite" => Action::Overwrite,
            "a" | "abort" => Action::Abort,
            _ => Action::Skip,
        }
    }
}

/// Resolves what to do with `dir` before any file is written.
///
/// The scan itself never modifies the directory.
///
/// # Errors
///
/// [`DownloadError::Io`] when the existing directory cannot be read.
pub fn prepare(
    dir: &Path,
    non_interactive: bool,
    prompter: &dyn ConflictPrompter,
) -> Result<Preparation, DownloadError> {
    let available_space = available_space(dir);

    if !dir.exists() {
        return Ok(Preparation {
            action: Action::Proceed,
            conflicts: Vec::new(),
            has_witness: false,
            available_space,
        });
    }

    let conflicts = scan_conflicts(dir)?;
    let has_witness = dir.join(WITNESS_FILENAME).is_file();

    let action = if has_witness {
        if non_interactive {
            debug!(dir = %dir.display(), "witness present, merging (non-interactive)");
            Action::Merge
        } else {
            prompter.resolve_conflict(dir, &conflicts, true)
        }
    } else if conflicts.is_empty() {
        if non_interactive { Action::Skip } else { Action::Proceed }
    } else if non_interactive {
        warn!(
            dir = %dir.display(),
            conflicts = conflicts.len(),
            "existing files without witness, skipping (non-interactive)"
        );
        Action::Skip
    } else {
        prompter.resolve_conflict(dir, &conflicts, false)
    };

    Ok(Preparation {
        action,
        conflicts,
        has_witness,
        available_space,
    })
}

/// Applies the resolved action to the directory.
///
/// `Proceed` and `Merge` ensure the directory exists; `Overwrite` removes
/// its current contents first; `Skip` and `Abort` leave it untouched.
///
/// # Errors
///
/// [`DownloadError::Io`] on file-system failures.
pub async fn apply_action(dir: &Path, action: Action) -> Result<(), DownloadError> {
    match action {
        Action::Proceed | Action::Merge => {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DownloadError::io(dir, e))
        }
        Action::Overwrite => {
            if dir.exists() {
                tokio::fs::remove_dir_all(dir)
                    .await
                    .map_err(|e| DownloadError::io(dir, e))?;
            }
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DownloadError::io(dir, e))
        }
        Action::Skip | Action::Abort => Ok(()),
    }
}

/// Verifies the volume has room for `needed` bytes.
///
/// Space reporting is best-effort: when it cannot be determined the check
/// passes.
///
/// # Errors
///
/// [`DownloadError::InsufficientSpace`] when the free space is known and
/// too small.
pub fn check_space(dir: &Path, needed: u64) -> Result<(), DownloadError> {
    if let Some(available) = available_space(dir) {
        if available < needed {
            return Err(DownloadError::InsufficientSpace {
                dir: dir.to_path_buf(),
                needed,
                available,
            });
        }
    }
    Ok(())
}

/// Lists existing files relative to `dir`, witness excluded, capped at
/// [`MAX_REPORTED_CONFLICTS`].
fn scan_conflicts(dir: &Path) -> Result<Vec<String>, DownloadError> {
    let mut conflicts = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| DownloadError::io(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| DownloadError::io(&current, e))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            if relative == WITNESS_FILENAME {
                continue;
            }
            conflicts.push(relative);
            if conflicts.len() >= MAX_REPORTED_CONFLICTS {
                return Ok(conflicts);
            }
        }
    }

    conflicts.sort();
    Ok(conflicts)
}

fn available_space(dir: &Path) -> Option<u64> {
    // Walk up to the nearest existing ancestor; statvfs needs a real path.
    let mut probe: &Path = dir;
    loop {
        if probe.exists() {
            return fs2::available_space(probe).ok();
        }
        probe = probe.parent()?;
    }
}
