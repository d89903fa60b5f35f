use crate::theme::Palette;

#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error(String),
}

impl ConnectionState {
    pub fn label(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".into(),
            Self::Connecting => "Connecting…".into(),
            Self::Connected => "Connected".into(),
            Self::Disconnecting => "Disconnecting…".into(),
            Self::Error(message) => format!("Error: {message}"),
        }
    }

    pub fn color(&self, palette: &Palette) -> u32 {
        match self {
            Self::Disconnected => palette.text_dim,
            Self::Connecting | Self::Disconnecting => palette.warning,
            Self::Connected => palette.online,
            Self::Error(_) => palette.offline,
        }
    }

    /// Label of the connect control for the server being viewed.
    pub fn button_label(&self, viewing_connected_server: bool) -> &'static str {
        match self {
            Self::Connecting => "Connecting...",
            Self::Disconnecting => "Disconnecting...",
            Self::Connected if viewing_connected_server => "Disconnect",
            _ => "Connect",
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}
