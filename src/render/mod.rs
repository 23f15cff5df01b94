//! Render Cache: status icons memoized by their visually relevant inputs.

pub mod appearance;
pub mod bitmap;
pub mod cache;
pub mod glyphs;
pub mod key;
pub mod paint;
pub mod redraw;

use serde::{Deserialize, Serialize};

pub use cache::RenderCache;
pub use key::RenderKey;
pub use redraw::Redrawer;

/// System light/dark mode the icon is drawn for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Appearance {
    #[default]
    Light,
    Dark,
}

impl Appearance {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Some(Appearance::Light),
            "dark" => Some(Appearance::Dark),
            _ => None,
        }
    }
}
