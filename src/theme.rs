use crate::store::{ConnectionStore, THEME_KEY};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }

    /// Unknown or missing values fall back to light.
    pub fn load(store: &ConnectionStore) -> Self {
        store
            .value(THEME_KEY)
            .and_then(Self::parse)
            .unwrap_or_default()
    }

    pub fn save(self, store: &mut ConnectionStore) -> Result<(), String> {
        store.set_value(THEME_KEY, self.as_str())?;
        log::info!("[theme] switched to {}", self.as_str());
        Ok(())
    }

    pub fn palette(self) -> Palette {
        match self {
            Self::Light => LIGHT,
            Self::Dark => DARK,
        }
    }
}

/// Terminal colors for one theme, as 0xRRGGBB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    pub text_primary: u32,
    pub text_dim: u32,
    pub accent: u32,
    pub online: u32,
    pub offline: u32,
    pub warning: u32,
}

// Light: strong colors readable on light backgrounds
const LIGHT: Palette = Palette {
    text_primary: 0x020202,
    text_dim: 0x5c5855,
    accent: 0x4687ff,
    online: 0x1f8a4c,
    offline: 0xd93050,
    warning: 0xc47a10,
};

const DARK: Palette = Palette {
    text_primary: 0xf2f2f2,
    text_dim: 0xa49d9a,
    accent: 0x6fa3ff,
    online: 0x4cd98a,
    offline: 0xff6b81,
    warning: 0xf2b43c,
};

impl Palette {
    /// Wraps `text` in a 24-bit foreground escape when `enabled`.
    pub fn paint(&self, text: &str, color: u32, enabled: bool) -> String {
        if !enabled {
            return text.to_string();
        }
        let red = (color >> 16) & 0xff;
        let green = (color >> 8) & 0xff;
        let blue = color & 0xff;
        format!("\x1b[38;2;{red};{green};{blue}m{text}\x1b[0m")
    }

    pub fn status_color(&self, online: bool) -> u32 {
        if online { self.online } else { self.offline }
    }
}
