use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use super::protocol::{parse_status_line, StatusLine};

/// An `f64` that can be read and written without locking.
#[derive(Debug, Default)]
pub struct PositionCell(AtomicU64);

impl PositionCell {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Position, duration and end-of-stream flag of the live session.
#[derive(Debug, Default)]
pub struct PlaybackClock {
    pub position: PositionCell,
    pub duration: PositionCell,
    ended: AtomicBool,
}

impl PlaybackClock {
    pub fn reset(&self, duration: f64) {
        self.position.set(0.0);
        self.duration.set(duration);
        self.ended.store(false, Ordering::Release);
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }
}

async fn next_status<R: AsyncBufRead + Unpin>(lines: &mut tokio::io::Lines<R>) -> StatusLine {
    match lines.next_line().await {
        Ok(Some(line)) => parse_status_line(&line),
        Ok(None) => StatusLine::StreamClosed,
        Err(e) => {
            log::debug!("[PLAYER] stdout read failed: {}", e);
            StatusLine::StreamClosed
        }
    }
}

/// Follows the player's stdout until it closes, feeding `clock`.
pub fn spawn_monitor<R>(reader: R, clock: Arc<PlaybackClock>) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match next_status(&mut lines).await {
                StatusLine::PositionUpdate(seconds) => clock.position.set(seconds),
                StatusLine::LengthAnnounced(seconds) => {
                    if clock.duration.get() <= 0.0 {
                        clock.duration.set(seconds);
                    }
                }
                StatusLine::Ignored => {}
                StatusLine::StreamClosed => break,
            }
        }
        clock.mark_ended();
        log::debug!("[PLAYER] Monitor finished");
    })
}
