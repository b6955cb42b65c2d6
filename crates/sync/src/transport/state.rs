use std::fmt;

/// Client-side session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GameState {
    #[default]
    Invalid,
    Connect,
    CharacterSelect,
    DownloadContent,
    Prepare,
    Play,
    Finished,
    /// Terminal until reset.
    Error,
}

impl GameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::Invalid => "invalid",
            GameState::Connect => "connect",
            GameState::CharacterSelect => "character-select",
            GameState::DownloadContent => "download-content",
            GameState::Prepare => "prepare",
            GameState::Play => "play",
            GameState::Finished => "finished",
            GameState::Error => "error",
        }
    }

    /// Past the handshake and still talking to the authority.
    pub fn is_joined(&self) -> bool {
        matches!(
            self,
            GameState::CharacterSelect
                | GameState::DownloadContent
                | GameState::Prepare
                | GameState::Play
                | GameState::Finished
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == GameState::Error
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
