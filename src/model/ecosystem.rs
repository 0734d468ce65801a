use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Chrome,
    Firefox,
    HomeAssistant,
    JetBrains,
    Minecraft,
    Obsidian,
    Sublime,
    Vscode,
    WordPress,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 9] = [
        Ecosystem::Chrome,
        Ecosystem::Firefox,
        Ecosystem::HomeAssistant,
        Ecosystem::JetBrains,
        Ecosystem::Minecraft,
        Ecosystem::Obsidian,
        Ecosystem::Sublime,
        Ecosystem::Vscode,
        Ecosystem::WordPress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Chrome => "chrome",
            Ecosystem::Firefox => "firefox",
            Ecosystem::HomeAssistant => "homeassistant",
            Ecosystem::JetBrains => "jetbrains",
            Ecosystem::Minecraft => "minecraft",
            Ecosystem::Obsidian => "obsidian",
            Ecosystem::Sublime => "sublime",
            Ecosystem::Vscode => "vscode",
            Ecosystem::WordPress => "wordpress",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Ecosystem::Chrome => "Chrome Web Store",
            Ecosystem::Firefox => "Firefox Add-ons",
            Ecosystem::HomeAssistant => "Home Assistant",
            Ecosystem::JetBrains => "JetBrains Marketplace",
            Ecosystem::Minecraft => "Minecraft Mods",
            Ecosystem::Obsidian => "Obsidian Plugins",
            Ecosystem::Sublime => "Sublime Text Packages",
            Ecosystem::Vscode => "VSCode Marketplace",
            Ecosystem::WordPress => "WordPress Plugins",
        }
    }

    /// Catalog-specific counters that stand in for `downloads`, in order of
    /// preference.
    pub(crate) fn download_fields(&self) -> &'static [&'static str] {
        match self {
            Ecosystem::Vscode => &["installs"],
            Ecosystem::Minecraft => &["downloadCount"],
            Ecosystem::Firefox => &["users", "averageDailyUsers", "weeklyDownloads"],
            Ecosystem::WordPress => &["activeInstalls"],
            Ecosystem::Chrome => &["users"],
            _ => &[],
        }
    }

    /// Whether GitHub stars are an acceptable popularity proxy when the
    /// catalog publishes no install counter.
    pub(crate) fn stars_as_downloads(&self) -> bool {
        matches!(self, Ecosystem::Sublime | Ecosystem::HomeAssistant)
    }

    /// Prefixes `id` with `<ecosystem>-` unless it already carries it.
    pub fn prefixed_id(&self, id: &str) -> String {
        let prefix = format!("{}-", self.as_str());
        if id.to_lowercase().starts_with(&prefix) {
            id.to_string()
        } else {
            format!("{}{}", prefix, id)
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Ecosystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chrome" => Ok(Ecosystem::Chrome),
            "firefox" => Ok(Ecosystem::Firefox),
            "homeassistant" | "home-assistant" | "hass" => Ok(Ecosystem::HomeAssistant),
            "jetbrains" => Ok(Ecosystem::JetBrains),
            "minecraft" => Ok(Ecosystem::Minecraft),
            "obsidian" => Ok(Ecosystem::Obsidian),
            "sublime" => Ok(Ecosystem::Sublime),
            "vscode" => Ok(Ecosystem::Vscode),
            "wordpress" => Ok(Ecosystem::WordPress),
            _ => Err(format!(
                "Unknown ecosystem: {}. Use: {}",
                s,
                Ecosystem::ALL
                    .iter()
                    .map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}
