//! Close-code classification

/// Websocket normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// The server closed after the match ended
    Normal,
    /// Anything else; the player is told they were disconnected
    Abnormal(u16),
}

impl DisconnectKind {
    pub fn from_close_code(code: u16) -> Self {
        if code == NORMAL_CLOSURE {
            DisconnectKind::Normal
        } else {
            DisconnectKind::Abnormal(code)
        }
    }

    /// Message shown to the player, if any
    pub fn message(&self) -> Option<&'static str> {
        match self {
            DisconnectKind::Normal => None,
            DisconnectKind::Abnormal(_) => Some("Disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        assert_eq!(DisconnectKind::from_close_code(1000), DisconnectKind::Normal);
        assert_eq!(DisconnectKind::from_close_code(1006), DisconnectKind::Abnormal(1006));
        assert_eq!(DisconnectKind::from_close_code(1001).message(), Some("Disconnected"));
        assert!(DisconnectKind::Normal.message().is_none());
    }
}
