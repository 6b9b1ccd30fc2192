use std::sync::Arc;
use std::time::Duration;
use moka::future::Cache;
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::api::client::ApiTransport;
use crate::api::pagination::{Aggregator, ProgressFn};
use crate::api::session::SharedSession;
use crate::api::{AccountInfo, Collection, Playlist, Track};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Phrases used for the popularity search that stands in for recommendations.
pub const POPULAR_QUERIES: [&str; 8] = [
    "популярные песни 2024",
    "хиты",
    "top hits",
    "новинки музыки",
    "русские хиты",
    "зарубежные хиты",
    "топ чарт",
    "billboard top 100",
];

/// Where a feed of tracks actually came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSource {
    /// The personal recommendation method answered.
    Recommendations,
    /// A popularity-sorted keyword search, either requested directly or used
    /// because the recommendation method was unavailable.
    Popular { query: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeed {
    pub source: FeedSource,
    pub tracks: Collection<Track>,
}

type PlaylistKey = (i64, i64);

/// Typed access to the audio methods of the API.
///
/// Every operation checks the session first and fails with "token not set"
/// without touching the network when the credential (or, for account-scoped
/// methods, the numeric account id) is missing.
pub struct AudioRepository {
    transport: Arc<dyn ApiTransport>,
    session: SharedSession,
    page_size: usize,
    recommendations_page_size: usize,
    search_max_results: usize,
    playlist_cache: Option<Cache<PlaylistKey, Arc<Collection<Track>>>>,
}

impl AudioRepository {
    pub fn new(transport: Arc<dyn ApiTransport>, session: SharedSession, config: &AppConfig) -> Self {
        let playlist_cache = (config.playlist_cache_ttl_secs > 0).then(|| {
            Cache::builder()
                .max_capacity(64)
                .time_to_live(Duration::from_secs(config.playlist_cache_ttl_secs))
                .build()
        });

        Self {
            transport,
            session,
            page_size: config.page_size,
            recommendations_page_size: config.recommendations_page_size,
            search_max_results: config.search_max_results,
            playlist_cache,
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    fn token(&self) -> Result<String> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .require_token()
    }

    fn identity(&self) -> Result<(String, i64)> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .require_identity()
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        method: &str,
        token: &str,
        mut params: Vec<(&'static str, String)>,
        offset: usize,
        count: usize,
    ) -> Result<Collection<T>> {
        params.push(("offset", offset.to_string()));
        params.push(("count", count.to_string()));
        let response = self.transport.call(method, token, &params).await?;
        Collection::from_response(response, offset)
    }

    /// Checks the token against `users.get` and records the account.
    pub async fn validate_token(&self) -> Result<AccountInfo> {
        let token = self.token()?;
        let response = self
            .transport
            .call("users.get", &token, &[("fields", "first_name,last_name".to_string())])
            .await?;

        let account: AccountInfo = response
            .as_array()
            .and_then(|users| users.first())
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| AppError::Provider("Empty users.get response".to_string()))?;

        log::info!("[AUTH] Token valid for {} (id {})", account.display_name(), account.id);
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_account(account.clone());
        Ok(account)
    }

    // -- my audio -----------------------------------------------------------

    pub async fn my_audio_page(&self, offset: usize, count: usize) -> Result<Collection<Track>> {
        let (token, user_id) = self.identity()?;
        self.my_audio_request(&token, user_id, offset, count).await
    }

    async fn my_audio_request(
        &self,
        token: &str,
        user_id: i64,
        offset: usize,
        count: usize,
    ) -> Result<Collection<Track>> {
        let params = vec![("owner_id", user_id.to_string())];
        self.fetch_page("audio.get", token, params, offset, count).await
    }

    pub async fn all_my_audio(&self, progress: Option<&mut ProgressFn<'_>>) -> Result<Collection<Track>> {
        let (token, user_id) = self.identity()?;
        Aggregator::new(self.page_size)
            .collect(|offset, count| self.my_audio_request(&token, user_id, offset, count), progress)
            .await
    }

    // -- recommendations & popular ------------------------------------------

    /// One page of recommendations, falling back to a popularity search when
    /// the recommendation method fails.
    pub async fn recommendations_page(&self, offset: usize, count: usize) -> Result<TrackFeed> {
        let token = self.token()?;
        match self.recommendations_request(&token, offset, count).await {
            Ok(tracks) => Ok(TrackFeed {
                source: FeedSource::Recommendations,
                tracks,
            }),
            Err(e) => {
                log::warn!("[API] Recommendations unavailable ({}), using popular search", e);
                self.popular_with_token(&token, offset, count).await
            }
        }
    }

    async fn recommendations_request(&self, token: &str, offset: usize, count: usize) -> Result<Collection<Track>> {
        let params = vec![("shuffle", "1".to_string())];
        self.fetch_page("audio.getRecommendations", token, params, offset, count).await
    }

    /// All recommendations in pages of the recommendation page size. If the
    /// recommendation method fails at any point the run restarts as a
    /// popularity search.
    pub async fn all_recommendations(&self, mut progress: Option<&mut ProgressFn<'_>>) -> Result<TrackFeed> {
        let token = self.token()?;
        let aggregator = Aggregator::new(self.recommendations_page_size);

        let personal = aggregator
            .collect(
                |offset, count| self.recommendations_request(&token, offset, count),
                progress.as_mut().map(|p| &mut **p as &mut ProgressFn<'_>),
            )
            .await;

        match personal {
            Ok(tracks) => Ok(TrackFeed {
                source: FeedSource::Recommendations,
                tracks,
            }),
            Err(e) => {
                log::warn!("[API] Recommendations unavailable ({}), using popular search", e);
                let query = random_popular_query();
                let tracks = aggregator
                    .collect(|offset, count| self.popular_request(&token, &query, offset, count), progress)
                    .await?;
                Ok(TrackFeed {
                    source: FeedSource::Popular { query },
                    tracks,
                })
            }
        }
    }

    /// One page of a popularity-sorted search for a random chart phrase.
    pub async fn popular_page(&self, offset: usize, count: usize) -> Result<TrackFeed> {
        let token = self.token()?;
        self.popular_with_token(&token, offset, count).await
    }

    async fn popular_with_token(&self, token: &str, offset: usize, count: usize) -> Result<TrackFeed> {
        let query = random_popular_query();
        let tracks = self.popular_request(token, &query, offset, count).await?;
        Ok(TrackFeed {
            source: FeedSource::Popular { query },
            tracks,
        })
    }

    async fn popular_request(&self, token: &str, query: &str, offset: usize, count: usize) -> Result<Collection<Track>> {
        let params = vec![
            ("q", query.to_string()),
            ("auto_complete", "1".to_string()),
            ("sort", "2".to_string()),
        ];
        self.fetch_page("audio.search", token, params, offset, count).await
    }

    // -- playlists ----------------------------------------------------------

    pub async fn playlists_page(&self, offset: usize, count: usize) -> Result<Collection<Playlist>> {
        let (token, user_id) = self.identity()?;
        self.playlists_request(&token, user_id, offset, count).await
    }

    async fn playlists_request(
        &self,
        token: &str,
        user_id: i64,
        offset: usize,
        count: usize,
    ) -> Result<Collection<Playlist>> {
        let params = vec![("owner_id", user_id.to_string())];
        self.fetch_page("audio.getPlaylists", token, params, offset, count).await
    }

    pub async fn all_playlists(&self, progress: Option<&mut ProgressFn<'_>>) -> Result<Collection<Playlist>> {
        let (token, user_id) = self.identity()?;
        Aggregator::new(self.page_size)
            .collect(|offset, count| self.playlists_request(&token, user_id, offset, count), progress)
            .await
    }

    pub async fn playlist_tracks_page(
        &self,
        playlist_id: i64,
        offset: usize,
        count: usize,
    ) -> Result<Collection<Track>> {
        let (token, user_id) = self.identity()?;
        self.playlist_tracks_request(&token, user_id, playlist_id, offset, count).await
    }

    async fn playlist_tracks_request(
        &self,
        token: &str,
        user_id: i64,
        playlist_id: i64,
        offset: usize,
        count: usize,
    ) -> Result<Collection<Track>> {
        let params = vec![
            ("album_id", playlist_id.to_string()),
            ("owner_id", user_id.to_string()),
        ];
        self.fetch_page("audio.get", token, params, offset, count).await
    }

    /// Every track of a playlist. Results are cached per playlist for a short
    /// while since stream URLs expire.
    pub async fn all_playlist_tracks(
        &self,
        playlist_id: i64,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Collection<Track>> {
        let (token, user_id) = self.identity()?;
        let key = (user_id, playlist_id);

        if let Some(cache) = &self.playlist_cache {
            if let Some(cached) = cache.get(&key).await {
                log::debug!("[API] Playlist {} served from cache", playlist_id);
                return Ok(cached.as_ref().clone());
            }
        }

        let tracks = Aggregator::new(self.page_size)
            .collect(
                |offset, count| self.playlist_tracks_request(&token, user_id, playlist_id, offset, count),
                progress,
            )
            .await?;

        if let Some(cache) = &self.playlist_cache {
            cache.insert(key, Arc::new(tracks.clone())).await;
        }
        Ok(tracks)
    }

    /// Drops the cached tracks of a playlist and fetches them again.
    pub async fn refresh_playlist_tracks(
        &self,
        playlist_id: i64,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Collection<Track>> {
        let (_, user_id) = self.identity()?;
        if let Some(cache) = &self.playlist_cache {
            cache.invalidate(&(user_id, playlist_id)).await;
        }
        self.all_playlist_tracks(playlist_id, progress).await
    }

    // -- search -------------------------------------------------------------

    pub async fn search_page(&self, query: &str, offset: usize, count: usize) -> Result<Collection<Track>> {
        let token = self.token()?;
        self.search_request(&token, query, offset, count).await
    }

    async fn search_request(&self, token: &str, query: &str, offset: usize, count: usize) -> Result<Collection<Track>> {
        let params = vec![("q", query.to_string()), ("auto_complete", "1".to_string())];
        self.fetch_page("audio.search", token, params, offset, count).await
    }

    /// All search results up to `max_results` (the configured cap when `None`).
    pub async fn search_all(
        &self,
        query: &str,
        max_results: Option<usize>,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Collection<Track>> {
        let token = self.token()?;
        let cap = max_results.unwrap_or(self.search_max_results);
        Aggregator::new(self.page_size)
            .with_max_results(Some(cap))
            .collect(|offset, count| self.search_request(&token, query, offset, count), progress)
            .await
    }
}

pub fn random_popular_query() -> String {
    POPULAR_QUERIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(POPULAR_QUERIES[0])
        .to_string()
}
