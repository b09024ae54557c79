//! Process-wide settings and validation.

use once_cell::sync::Lazy;

/// Environment variable that disables content hashing for every watcher in
/// the process, regardless of what individual builders ask for.
pub const PREVENT_FILE_HASHING_VAR: &str = "TREEWATCH_PREVENT_FILE_HASHING";

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

/// Process-wide settings for treewatch.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Veto content hashing for all watchers in this process.
    pub prevent_file_hashing: bool,
}

impl Settings {
    /// Create settings with defaults (hashing allowed).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            prevent_file_hashing: std::env::var(PREVENT_FILE_HASHING_VAR)
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    /// The settings loaded once for this process.
    #[must_use]
    pub fn get() -> &'static Self {
        &SETTINGS
    }
}

/// Parse a boolean environment flag. Unrecognized values count as unset.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
