use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-process counter that keeps concurrent writers from sharing a temp name.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomically replace the contents of `path`, creating parent directories as needed.
///
/// The bytes go to a sibling temp file first and are renamed into place, so a
/// concurrent reader sees either the previous contents or the new ones. Two
/// writers racing on the same path each use their own temp file; the last
/// rename wins.
///
/// # Errors
/// Returns an error if the directory cannot be created or the write/rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp_path = parent.join(format!(
        ".{}.{}.{seq}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Windows refuses to rename over an open target; fall back to copy.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}
