use super::Appearance;
use crate::profiles::{DisplayConfig, IconStyle};
use serde::Serialize;

/// Percentage step of one bucket for the graphical styles.
pub const GRAPHIC_BUCKET: f64 = 5.0;

/// The visually relevant inputs of a status icon.
///
/// Two snapshots in the same bucket produce the same key and therefore the
/// same bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RenderKey {
    /// Displayed percentage in buckets: 5-point steps for graphical styles,
    /// whole points for `IconStyle::Percentage`.
    pub bucket: u8,
    pub appearance: Appearance,
    pub style: IconStyle,
    pub monochrome: bool,
    pub remaining_mode: bool,
}

impl RenderKey {
    /// `used_percent` is the session utilization; remaining mode inverts it.
    pub fn new(used_percent: f64, appearance: Appearance, display: &DisplayConfig) -> Self {
        let used = if used_percent.is_finite() {
            used_percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let shown = if display.remaining_mode { 100.0 - used } else { used };
        let bucket = match display.style {
            IconStyle::Percentage => shown.round(),
            _ => (shown / GRAPHIC_BUCKET).floor(),
        } as u8;
        Self {
            bucket,
            appearance,
            style: display.style,
            monochrome: display.monochrome,
            remaining_mode: display.remaining_mode,
        }
    }

    /// Lower bound of the displayed percentage this key stands for.
    pub fn shown_percent(&self) -> u8 {
        match self.style {
            IconStyle::Percentage => self.bucket,
            _ => (f64::from(self.bucket) * GRAPHIC_BUCKET) as u8,
        }
    }

    /// Lower bound of the used percentage, for severity coloring.
    pub fn used_percent(&self) -> u8 {
        if self.remaining_mode {
            100u8.saturating_sub(self.shown_percent())
        } else {
            self.shown_percent()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(style: IconStyle, remaining_mode: bool) -> DisplayConfig {
        DisplayConfig {
            style,
            remaining_mode,
            ..DisplayConfig::default()
        }
    }

    #[test]
    fn test_graphic_buckets() {
        let d = display(IconStyle::Battery, false);
        assert_eq!(RenderKey::new(42.0, Appearance::Light, &d).bucket, 8);
        assert_eq!(RenderKey::new(44.9, Appearance::Light, &d).bucket, 8);
        assert_eq!(RenderKey::new(45.0, Appearance::Light, &d).bucket, 9);
        assert_eq!(RenderKey::new(100.0, Appearance::Light, &d).bucket, 20);
        assert_eq!(RenderKey::new(140.0, Appearance::Light, &d).bucket, 20);
        assert_eq!(RenderKey::new(f64::NAN, Appearance::Light, &d).bucket, 0);
    }

    #[test]
    fn test_percentage_style_uses_whole_points() {
        let d = display(IconStyle::Percentage, false);
        let a = RenderKey::new(42.2, Appearance::Dark, &d);
        let b = RenderKey::new(42.6, Appearance::Dark, &d);
        assert_eq!(a.bucket, 42);
        assert_eq!(b.bucket, 43);
        assert_ne!(a, b);
    }

    #[test]
    fn test_remaining_mode_inverts() {
        let d = display(IconStyle::Bar, true);
        let key = RenderKey::new(30.0, Appearance::Light, &d);
        assert_eq!(key.shown_percent(), 70);
        assert_eq!(key.used_percent(), 30);
    }

    #[test]
    fn test_same_bucket_same_key() {
        let d = display(IconStyle::Ring, false);
        assert_eq!(
            RenderKey::new(41.0, Appearance::Light, &d),
            RenderKey::new(43.5, Appearance::Light, &d)
        );
        assert_ne!(
            RenderKey::new(41.0, Appearance::Light, &d),
            RenderKey::new(41.0, Appearance::Dark, &d)
        );
    }
}
