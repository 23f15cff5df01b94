//! Profiles: isolated account contexts with their own credentials, display
//! settings and cached usage.

pub mod manager;
pub mod migration;
pub mod store;
pub mod types;

pub use manager::ProfileManager;
pub use store::ProfileStore;
pub use types::{DisplayConfig, DisplayMode, IconStyle, NotificationThresholds, Profile, ProfileId};
