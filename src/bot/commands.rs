/// A parsed prefix command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Everything after the command word, trimmed
    Play(String),
    Loop,
    Shuffle,
    Pause,
    Resume,
    Lyrics,
    Skip,
    Stop,
    Clear,
    Playlist,
    MostPlayed,
    MostRequested,
}

impl Command {
    /// Parses `content` if it starts with `prefix` and names a known command.
    /// Unknown words yield `None` so other bots sharing the prefix are left alone.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let body = content.trim_start().strip_prefix(prefix)?;
        let (word, rest) = match body.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (body, ""),
        };

        let command = match word.to_lowercase().as_str() {
            "play" | "p" => Command::Play(rest.to_string()),
            "loop" => Command::Loop,
            "shuffle" | "random" => Command::Shuffle,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "lyrics" => Command::Lyrics,
            "skip" | "s" => Command::Skip,
            "stop" | "leave" => Command::Stop,
            "clear" => Command::Clear,
            "playlist" | "pl" => Command::Playlist,
            "most_played" | "top" | "mtop" => Command::MostPlayed,
            "most_requested" | "topreq" | "rtop" | "topdj" | "plays" | "reqs" => {
                Command::MostRequested
            }
            _ => return None,
        };

        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::Loop => "loop",
            Command::Shuffle => "shuffle",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Lyrics => "lyrics",
            Command::Skip => "skip",
            Command::Stop => "stop",
            Command::Clear => "clear",
            Command::Playlist => "playlist",
            Command::MostPlayed => "most_played",
            Command::MostRequested => "most_requested",
        }
    }
}
