pub mod http_pool;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::api::Track;
use crate::errors::{AppError, Result};
use crate::utils::{format_file_size, sanitize_track_filename};
use http_pool::HttpPool;

/// Message for tracks the provider returned without a stream URL.
pub const NO_DOWNLOAD_URL: &str = "no download URL";

/// Progress callback for batch downloads, `(done, total)`.
pub type BatchProgressFn<'a> = dyn FnMut(usize, usize) + Send + 'a;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<chrono::DateTime<chrono::Local>>,
}

impl DownloadedFile {
    pub fn display_size(&self) -> String {
        format_file_size(self.size)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: Vec<PathBuf>,
    /// `(track display name, error message)` per failed track.
    pub failures: Vec<(String, String)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.succeeded.len() == self.total
    }
}

/// Saves tracks as `<artist> - <title>.mp3` into the downloads folder.
pub struct DownloadManager {
    http_pool: Arc<HttpPool>,
    folder: PathBuf,
}

impl DownloadManager {
    /// Creates the downloads folder if needed. Failing to do so is fatal for
    /// the application.
    pub fn new(http_pool: Arc<HttpPool>, folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        std::fs::create_dir_all(&folder).map_err(|e| {
            log::error!("[DOWNLOAD] Cannot create download folder {:?}: {}", folder, e);
            AppError::Io(e)
        })?;

        Ok(Self { http_pool, folder })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Downloads one track into `folder` (the default folder when `None`) and
    /// returns the path written. Existing files are never overwritten.
    pub async fn download(&self, track: &Track, folder: Option<&Path>) -> Result<PathBuf> {
        let url = track
            .url
            .as_deref()
            .ok_or_else(|| AppError::Download(NO_DOWNLOAD_URL.to_string()))?;

        let folder = folder.unwrap_or(self.folder.as_path());
        crate::utils::ensure_dir_exists(folder).await?;

        let target = folder.join(sanitize_track_filename(&track.artist, &track.title));
        log::info!("[DOWNLOAD] {} -> {:?}", track.display_name(), target);

        let (path, bytes) = self.http_pool.stream_to_new_file(url, &target).await?;
        log::info!(
            "[DOWNLOAD] Saved {} as {:?} ({})",
            track.display_name(),
            path.file_name().unwrap_or_default(),
            format_file_size(bytes)
        );
        Ok(path)
    }

    /// Downloads `tracks` one after another into the default folder, reporting
    /// `(done, total)` after each. A failing track does not stop the batch.
    pub async fn download_all(
        &self,
        tracks: &[Track],
        mut progress: Option<&mut BatchProgressFn<'_>>,
    ) -> BatchReport {
        let mut report = BatchReport {
            total: tracks.len(),
            ..BatchReport::default()
        };

        for (index, track) in tracks.iter().enumerate() {
            match self.download(track, None).await {
                Ok(path) => report.succeeded.push(path),
                Err(e) => {
                    log::warn!("[DOWNLOAD] {} failed: {}", track.display_name(), e);
                    report.failures.push((track.display_name(), e.to_string()));
                }
            }
            if let Some(report_progress) = progress.as_mut() {
                report_progress(index + 1, tracks.len());
            }
        }

        log::info!(
            "[DOWNLOAD] Batch finished: {}/{} saved, {} failed",
            report.succeeded.len(),
            report.total,
            report.failures.len()
        );
        report
    }

    /// `.mp3` files in the downloads folder, sorted by name.
    pub fn list_downloads(&self) -> Result<Vec<DownloadedFile>> {
        let mut files = Vec::new();

        for entry in std::fs::read_dir(&self.folder)? {
            let entry = entry?;
            let path = entry.path();
            let is_mp3 = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("mp3"))
                .unwrap_or(false);
            if !is_mp3 {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            files.push(DownloadedFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size: metadata.len(),
                modified: metadata.modified().ok().map(chrono::DateTime::from),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, MediaServer};

    fn track(artist: &str, title: &str, url: Option<String>) -> Track {
        Track {
            id: 1,
            owner_id: 1,
            artist: artist.to_string(),
            title: title.to_string(),
            duration: 180,
            url,
        }
    }

    fn manager(folder: &Path) -> DownloadManager {
        let pool = Arc::new(HttpPool::new(&test_config()).unwrap());
        DownloadManager::new(pool, folder).unwrap()
    }

    #[tokio::test]
    async fn same_name_gets_numbered_suffix() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let song = track("AC/DC", "Back in Black?", Some(server.url("/x.mp3")));

        let first = manager.download(&song, None).await.unwrap();
        let second = manager.download(&song, None).await.unwrap();

        assert_eq!(first.file_name().unwrap(), "ACDC - Back in Black.mp3");
        assert_eq!(second.file_name().unwrap(), "ACDC - Back in Black (1).mp3");
        assert_eq!(std::fs::read(&first).unwrap(), b"mp3");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_downloads_of_one_track_keep_both_files() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let song = track("A", "B", Some(server.url("/b.mp3")));

        let (a, b) = tokio::join!(manager.download(&song, None), manager.download(&song, None));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a, b);
        let mut names = vec![
            a.file_name().unwrap().to_string_lossy().into_owned(),
            b.file_name().unwrap().to_string_lossy().into_owned(),
        ];
        names.sort();
        assert_eq!(names, vec!["A - B (1).mp3", "A - B.mp3"]);
        assert_eq!(manager.list_downloads().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_url_fails_without_request_or_file() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let err = manager.download(&track("A", "B", None), None).await.unwrap_err();

        assert!(err.to_string().contains(NO_DOWNLOAD_URL));
        assert_eq!(server.hits(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn explicit_folder_is_created() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let elsewhere = dir.path().join("playlist");

        let path = manager
            .download(&track("A", "B", Some(server.url("/b.mp3"))), Some(&elsewhere))
            .await
            .unwrap();

        assert_eq!(path, elsewhere.join("A - B.mp3"));
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let tracks = vec![
            track("One", "Song", Some(server.url("/1.mp3"))),
            track("Two", "Song", None),
            track("Three", "Song", Some(server.url("/3.mp3"))),
        ];
        let mut seen = Vec::new();
        let mut record = |done: usize, total: usize| seen.push((done, total));

        let report = manager.download_all(&tracks, Some(&mut record)).await;

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failures, vec![("Two - Song".to_string(), format!("Download error: {}", NO_DOWNLOAD_URL))]);
        assert!(!report.is_complete());
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn listing_keeps_only_mp3_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b - song.mp3"), vec![0u8; 2048]).unwrap();
        std::fs::write(dir.path().join("a - song.MP3"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("folder.mp3")).unwrap();
        let manager = manager(dir.path());

        let files = manager.list_downloads().unwrap();

        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a - song.MP3", "b - song.mp3"]);
        assert_eq!(files[1].display_size(), "2.0 KB");
        assert!(files[1].modified.is_some());
    }

    #[test]
    fn uncreatable_folder_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let pool = Arc::new(HttpPool::new(&test_config()).unwrap());

        assert!(DownloadManager::new(pool, blocker.join("sub")).is_err());
    }
}
