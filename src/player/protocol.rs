//! Line protocol spoken with mplayer in `-slave` mode.

/// Prefix of the answer to `get_time_pos`.
pub const TIME_POSITION_PREFIX: &str = "ANS_TIME_POSITION=";

/// Length announced by `-identify` once the file is opened.
pub const LENGTH_PREFIX: &str = "ID_LENGTH=";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    /// Toggles pause.
    Pause,
    /// Absolute seek, in seconds.
    Seek(f64),
    /// Absolute volume, 0-100.
    Volume(u8),
    /// Asks for an `ANS_TIME_POSITION` line without leaving the pause state.
    GetTimePos,
    Quit,
}

impl PlayerCommand {
    pub fn to_line(&self) -> String {
        match self {
            PlayerCommand::Pause => "pause".to_string(),
            PlayerCommand::Seek(seconds) => format!("seek {} 2", seconds.max(0.0)),
            PlayerCommand::Volume(level) => format!("volume {} 1", (*level).min(100)),
            PlayerCommand::GetTimePos => "pausing_keep_force get_time_pos".to_string(),
            PlayerCommand::Quit => "quit".to_string(),
        }
    }
}

/// What one read from the player's stdout amounted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusLine {
    PositionUpdate(f64),
    LengthAnnounced(f64),
    Ignored,
    /// End of stream; the player has exited or closed stdout.
    StreamClosed,
}

/// Classifies a single stdout line. Malformed values are ignored.
pub fn parse_status_line(line: &str) -> StatusLine {
    let line = line.trim();

    let parse_seconds = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
    };

    if let Some(value) = line.strip_prefix(TIME_POSITION_PREFIX) {
        return parse_seconds(value).map_or(StatusLine::Ignored, StatusLine::PositionUpdate);
    }
    if let Some(value) = line.strip_prefix(LENGTH_PREFIX) {
        return parse_seconds(value).map_or(StatusLine::Ignored, StatusLine::LengthAnnounced);
    }
    StatusLine::Ignored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_render_slave_syntax() {
        assert_eq!(PlayerCommand::Pause.to_line(), "pause");
        assert_eq!(PlayerCommand::Seek(30.0).to_line(), "seek 30 2");
        assert_eq!(PlayerCommand::Seek(12.5).to_line(), "seek 12.5 2");
        assert_eq!(PlayerCommand::Seek(-4.0).to_line(), "seek 0 2");
        assert_eq!(PlayerCommand::Volume(75).to_line(), "volume 75 1");
        assert_eq!(PlayerCommand::Volume(250).to_line(), "volume 100 1");
        assert_eq!(PlayerCommand::GetTimePos.to_line(), "pausing_keep_force get_time_pos");
        assert_eq!(PlayerCommand::Quit.to_line(), "quit");
    }

    #[test]
    fn position_lines_are_parsed() {
        assert_eq!(parse_status_line("ANS_TIME_POSITION=42.5"), StatusLine::PositionUpdate(42.5));
        assert_eq!(parse_status_line("ANS_TIME_POSITION=7\n"), StatusLine::PositionUpdate(7.0));
        assert_eq!(parse_status_line("ID_LENGTH=215.00"), StatusLine::LengthAnnounced(215.0));
    }

    #[test]
    fn malformed_lines_are_ignored() {
        assert_eq!(parse_status_line("ANS_TIME_POSITION=abc"), StatusLine::Ignored);
        assert_eq!(parse_status_line("ANS_TIME_POSITION="), StatusLine::Ignored);
        assert_eq!(parse_status_line("ANS_TIME_POSITION=-3"), StatusLine::Ignored);
        assert_eq!(parse_status_line("ANS_TIME_POSITION=NaN"), StatusLine::Ignored);
        assert_eq!(parse_status_line("Playing /tmp/vk-music-x.mp3."), StatusLine::Ignored);
        assert_eq!(parse_status_line(""), StatusLine::Ignored);
    }
}
