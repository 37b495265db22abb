use resonate_proto::AudioFormat;

/// See the module-level transition table.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    HandshakePending,
    Ready,
    Streaming(AudioFormat),
    Error(String),
}

impl SessionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Streaming(_))
    }
}
