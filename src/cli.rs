use crate::profiles::{DisplayMode, IconStyle};
use crate::render::Appearance;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meterbar")]
#[command(about = "Multi-profile Claude usage meter")]
#[command(version)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("METERBAR_GIT_SHA"), ")"))]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Storage directory (defaults to $METERBAR_HOME or ~/.meterbar)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the refresh engine, auto-start monitor and icon renderer until interrupted
    Run {
        /// Fixed icon appearance; follows the system setting when omitted
        #[arg(long, value_parser = parse_appearance)]
        appearance: Option<Appearance>,
    },
    /// Show profiles and their last known usage
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Fetch usage now
    Refresh {
        /// Profile name or id (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
        /// Refresh every displayed profile
        #[arg(long, conflicts_with = "profile")]
        all: bool,
    },
    /// Write the current status icon as a PNG
    Render {
        #[arg(long)]
        profile: Option<String>,
        #[arg(long, default_value = "light", value_parser = parse_appearance)]
        appearance: Appearance,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List organizations reachable with the profile's session key
    Orgs {
        #[arg(long)]
        profile: Option<String>,
    },
    /// Show the prepaid API credit balance
    Billing {
        #[arg(long)]
        profile: Option<String>,
    },
    #[command(subcommand)]
    Profile(ProfileCommand),
    #[command(subcommand)]
    Credentials(CredentialsCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    List,
    Create {
        name: Option<String>,
        /// Copy display and refresh settings from another profile
        #[arg(long)]
        copy_from: Option<String>,
    },
    Rename {
        profile: String,
        name: String,
    },
    Delete {
        profile: String,
    },
    /// Make a profile the active one
    Activate {
        profile: String,
    },
    /// Toggle a profile's participation in multi-profile display
    Select {
        profile: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CredentialsCommand {
    Set {
        #[arg(long)]
        profile: Option<String>,
        /// Web session key (sk-ant-sid01-...)
        #[arg(long)]
        session_key: Option<String>,
        /// Organization id used with the session key
        #[arg(long)]
        org: Option<String>,
        /// Console API key, used for billing only
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long, requires = "api_key")]
        api_org: Option<String>,
    },
    /// Copy the current CLI login into the profile
    ImportCli {
        #[arg(long)]
        profile: Option<String>,
    },
    Clear {
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Display {
        #[arg(long)]
        profile: Option<String>,
        #[arg(long, value_parser = parse_icon_style)]
        style: Option<IconStyle>,
        #[arg(long)]
        monochrome: Option<bool>,
        /// Show percentage remaining instead of used
        #[arg(long)]
        remaining: Option<bool>,
        #[arg(long)]
        show_weekly: Option<bool>,
        #[arg(long)]
        show_sub_metrics: Option<bool>,
    },
    Interval {
        #[arg(long)]
        profile: Option<String>,
        /// Seconds between refreshes (clamped to 5..=300)
        secs: u64,
    },
    AutoStart {
        #[arg(long)]
        profile: Option<String>,
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    Thresholds {
        #[arg(long)]
        profile: Option<String>,
        /// One of 75, 90, 95
        level: u8,
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    Mode {
        #[arg(value_parser = parse_display_mode)]
        mode: DisplayMode,
    },
    /// Read usage from a tracker snapshot file instead of the API
    External {
        #[arg(long)]
        profile: Option<String>,
        #[arg(conflicts_with = "clear")]
        path: Option<PathBuf>,
        #[arg(long)]
        clear: bool,
    },
}

fn parse_appearance(s: &str) -> Result<Appearance, String> {
    Appearance::parse(s).ok_or_else(|| format!("unknown appearance '{}' (light, dark)", s))
}

fn parse_icon_style(s: &str) -> Result<IconStyle, String> {
    IconStyle::parse(s)
        .ok_or_else(|| format!("unknown style '{}' (battery, bar, percentage, ring)", s))
}

fn parse_display_mode(s: &str) -> Result<DisplayMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "single" => Ok(DisplayMode::Single),
        "multi" => Ok(DisplayMode::Multi),
        _ => Err(format!("unknown display mode '{}' (single, multi)", s)),
    }
}
