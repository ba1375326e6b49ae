//! Verify command implementation.

use kvsave_core::ArchiveCodec;
use std::path::{Path, PathBuf};

/// Verdict for one group file.
#[derive(Debug)]
pub enum FileStatus {
    /// Decodes cleanly.
    Ok {
        /// Number of entries.
        entries: usize,
    },
    /// Decodes, but the frame is not pristine.
    Warning {
        /// Number of entries.
        entries: usize,
        /// What is off.
        reason: String,
    },
    /// Cannot be loaded.
    Corrupt {
        /// Why.
        reason: String,
    },
}

impl FileStatus {
    fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Checks one file.
pub fn check_file(path: &Path, codec: &ArchiveCodec) -> FileStatus {
    tracing::debug!(path = %path.display(), "checking group file");
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            return FileStatus::Corrupt {
                reason: format!("read failed: {e}"),
            }
        }
    };

    let frame = match codec.read_frame(&data) {
        Ok(frame) => frame,
        Err(e) => {
            return FileStatus::Corrupt {
                reason: e.to_string(),
            }
        }
    };
    let footer_intact = frame.footer_intact;
    let trailing = frame.trailing;

    let entries = match codec.decode(&data) {
        Ok(entries) => entries.len(),
        Err(e) => {
            return FileStatus::Corrupt {
                reason: e.to_string(),
            }
        }
    };

    if !footer_intact {
        FileStatus::Warning {
            entries,
            reason: "footer mismatch".to_string(),
        }
    } else if trailing > 0 {
        FileStatus::Warning {
            entries,
            reason: format!("{trailing} trailing bytes"),
        }
    } else {
        FileStatus::Ok { entries }
    }
}

/// Checks every file in `dir` with the given extension, sorted by name.
pub fn check_directory(
    dir: &Path,
    extension: &str,
    codec: &ArchiveCodec,
) -> Result<Vec<(PathBuf, FileStatus)>, Box<dyn std::error::Error>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();

    Ok(files
        .into_iter()
        .map(|path| {
            let status = check_file(&path, codec);
            (path, status)
        })
        .collect())
}

/// Runs the verify command.
pub fn run(
    dir: &Path,
    extension: &str,
    codec: &ArchiveCodec,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying group files in {}", dir.display());
    println!();

    let results = check_directory(dir, extension, codec)?;
    let mut corrupt = 0;
    for (path, status) in &results {
        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        match status {
            FileStatus::Ok { entries } => println!("  ok       {name} ({entries} entries)"),
            FileStatus::Warning { entries, reason } => {
                println!("  warning  {name} ({entries} entries): {reason}");
            }
            FileStatus::Corrupt { reason } => println!("  corrupt  {name}: {reason}"),
        }
        if status.is_corrupt() {
            corrupt += 1;
        }
    }

    println!();
    if corrupt == 0 {
        println!("✓ {} group files verified", results.len());
        Ok(())
    } else {
        println!("✗ {corrupt} of {} group files are corrupt", results.len());
        Err("Verification failed".into())
    }
}
