//! Navigation cursor over the tracks loaded for playback.
//!
//! The queue never starts playback itself; callers hand the returned track to
//! the controller.

use crate::api::Track;

#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    tracks: Vec<Track>,
    current: Option<usize>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents; nothing is selected afterwards.
    pub fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.current = None;
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.and_then(|i| self.tracks.get(i))
    }

    /// Moves the cursor to `index`; out of range leaves it untouched.
    pub fn select(&mut self, index: usize) -> Option<&Track> {
        if index >= self.tracks.len() {
            return None;
        }
        self.current = Some(index);
        self.tracks.get(index)
    }

    /// Advances the cursor. With nothing selected yet this is the first track.
    pub fn next(&mut self) -> Option<&Track> {
        let next = match self.current {
            Some(i) => i + 1,
            None => 0,
        };
        self.select(next)
    }

    pub fn previous(&mut self) -> Option<&Track> {
        match self.current {
            Some(i) if i > 0 => self.select(i - 1),
            _ => None,
        }
    }
}
