use std::path::{Path, PathBuf};
use crate::errors::Result;
use log::info;

/// Keeps alphanumerics, space, hyphen and underscore, then trims.
pub fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Builds the `<artist> - <title>.mp3` filename for a track.
pub fn sanitize_track_filename(artist: &str, title: &str) -> String {
    format!("{} - {}.mp3", sanitize_component(artist), sanitize_component(title))
}

/// `path` itself for `n == 0`, otherwise `<stem> (n).<ext>` beside it.
fn numbered_path(path: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let candidate_name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    parent.join(candidate_name)
}

/// Creates `path`, or the first free `<stem> (n).<ext>`, and returns the open
/// file with the name it got. The existence check and the creation are one
/// step, so concurrent callers never end up sharing a name.
pub async fn create_unique_file(path: &Path) -> Result<(tokio::fs::File, PathBuf)> {
    let mut n = 0u32;
    loop {
        let candidate = numbered_path(path, n);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("[DOWNLOAD] Created directory: {:?}", path);
    }
    Ok(())
}

/// `12.3 KB` below one mebibyte, `4.5 MB` from there on.
pub fn format_file_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes < MIB {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    }
}

/// `m:ss` rendering used for positions and durations.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Generates a unique id for a background task
pub fn generate_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Looks an executable up the way a shell would: explicit paths are checked
/// directly, bare names are searched on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|full| full.is_file())
}
