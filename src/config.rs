use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{ConfigError, SortError};
use crate::ledger::{HistoryStore, same_path};

const CONFIG_DIR_NAME: &str = "imgsort";
const CONFIG_FILE_NAME: &str = "imgsort.toml";
const HISTORY_FILE_NAME: &str = "history.json";
const LOG_FILE_NAME: &str = "imgsort.log";

pub const SLOT_COUNT: usize = 5;
const MAX_RECENT_FOLDERS: usize = 5;

// Sections an imported settings file must carry.
const REQUIRED_SECTIONS: &[&str] = &["folders", "recent_folders", "theme_mode", "custom_theme"];

// --- Destination slots ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FolderSlot {
    pub name: String,
    pub path: PathBuf,
}

impl FolderSlot {
    pub fn placeholder(index: usize) -> Self {
        let letter = (b'A' + (index % 26) as u8) as char;
        Self {
            name: format!("Folder {}", letter),
            path: PathBuf::from(format!("output/{}", letter)),
        }
    }

    pub fn defaults() -> Vec<FolderSlot> {
        (0..SLOT_COUNT).map(Self::placeholder).collect()
    }

    /// Still pointing at one of the stock `output/X` paths.
    pub fn is_placeholder(&self) -> bool {
        (0..SLOT_COUNT).any(|i| same_path(&self.path, &Self::placeholder(i).path))
    }
}

// --- Theme ---

/// `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl HexColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for HexColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().strip_prefix('#').ok_or_else(|| format!("color '{}' must start with '#'", s))?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("color '{}' is not #RRGGBB", s));
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
        Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for HexColor {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HexColor> for String {
    fn from(c: HexColor) -> Self {
        c.to_string()
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Every user-configurable color of the theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThemeField {
    Background,
    Text,
    Button,
    ButtonHover,
    Label,
    Menu,
    MenuText,
    MainBorder,
    NextBorder,
}

impl ThemeField {
    pub const ALL: [ThemeField; 9] = [
        ThemeField::Background,
        ThemeField::Text,
        ThemeField::Button,
        ThemeField::ButtonHover,
        ThemeField::Label,
        ThemeField::Menu,
        ThemeField::MenuText,
        ThemeField::MainBorder,
        ThemeField::NextBorder,
    ];

    /// Name used on the command line.
    pub fn key(&self) -> &'static str {
        match self {
            ThemeField::Background => "background",
            ThemeField::Text => "text",
            ThemeField::Button => "button",
            ThemeField::ButtonHover => "button-hover",
            ThemeField::Label => "label",
            ThemeField::Menu => "menu",
            ThemeField::MenuText => "menu-text",
            ThemeField::MainBorder => "main-border",
            ThemeField::NextBorder => "next-border",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ThemeField::Background => "Background",
            ThemeField::Text => "Text",
            ThemeField::Button => "Button",
            ThemeField::ButtonHover => "Button Hover",
            ThemeField::Label => "Label Background",
            ThemeField::Menu => "Menu Background",
            ThemeField::MenuText => "Menu Text",
            ThemeField::MainBorder => "Main Image Border",
            ThemeField::NextBorder => "Next Image Border",
        }
    }
}

impl FromStr for ThemeField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('_', "-");
        ThemeField::ALL.into_iter().find(|f| f.key() == key).ok_or_else(|| {
            let keys: Vec<&str> = ThemeField::ALL.iter().map(|f| f.key()).collect();
            format!("unknown theme color '{}' (one of: {})", s, keys.join(", "))
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
    Custom,
}

impl ThemeMode {
    pub fn cycle(&self) -> Self {
        match self {
            ThemeMode::System => ThemeMode::Light,
            ThemeMode::Light => ThemeMode::Dark,
            ThemeMode::Dark => ThemeMode::Custom,
            ThemeMode::Custom => ThemeMode::System,
        }
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
            ThemeMode::System => "system",
            ThemeMode::Custom => "custom",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Theme {
    pub bg_color: HexColor,
    pub text_color: HexColor,
    pub btn_bg: HexColor,
    pub btn_hover: HexColor,
    pub label_bg: HexColor,
    pub menu_bg: HexColor,
    pub menu_text: HexColor,
    pub main_border_color: HexColor,
    pub next_border_color: HexColor,
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            bg_color: HexColor::rgb(0x12, 0x12, 0x12),
            text_color: HexColor::rgb(0xFF, 0xFF, 0xFF),
            btn_bg: HexColor::rgb(0x2E, 0x2E, 0x2E),
            btn_hover: HexColor::rgb(0x44, 0x44, 0x44),
            label_bg: HexColor::rgb(0x1A, 0x1A, 0x1A),
            menu_bg: HexColor::rgb(0x1A, 0x1A, 0x1A),
            menu_text: HexColor::rgb(0xFF, 0xFF, 0xFF),
            main_border_color: HexColor::rgb(0x00, 0xBF, 0xFF),
            next_border_color: HexColor::rgb(0x32, 0xCD, 0x32),
        }
    }

    pub fn light() -> Self {
        Self {
            bg_color: HexColor::rgb(0xF5, 0xF5, 0xF5),
            text_color: HexColor::rgb(0x21, 0x21, 0x21),
            btn_bg: HexColor::rgb(0xE0, 0xE0, 0xE0),
            btn_hover: HexColor::rgb(0xCC, 0xCC, 0xCC),
            label_bg: HexColor::rgb(0xFF, 0xFF, 0xFF),
            menu_bg: HexColor::rgb(0xFF, 0xFF, 0xFF),
            menu_text: HexColor::rgb(0x21, 0x21, 0x21),
            main_border_color: HexColor::rgb(0x1E, 0x88, 0xE5),
            next_border_color: HexColor::rgb(0x43, 0xA0, 0x47),
        }
    }

    /// Palette in effect for `mode`. There is no portable way to ask the
    /// terminal for its scheme, so `System` means dark.
    pub fn for_mode(mode: ThemeMode, custom: &Theme) -> Theme {
        match mode {
            ThemeMode::Light => Self::light(),
            ThemeMode::Dark | ThemeMode::System => Self::dark(),
            ThemeMode::Custom => custom.clone(),
        }
    }

    pub fn get(&self, field: ThemeField) -> HexColor {
        match field {
            ThemeField::Background => self.bg_color,
            ThemeField::Text => self.text_color,
            ThemeField::Button => self.btn_bg,
            ThemeField::ButtonHover => self.btn_hover,
            ThemeField::Label => self.label_bg,
            ThemeField::Menu => self.menu_bg,
            ThemeField::MenuText => self.menu_text,
            ThemeField::MainBorder => self.main_border_color,
            ThemeField::NextBorder => self.next_border_color,
        }
    }

    pub fn set(&mut self, field: ThemeField, color: HexColor) {
        let slot = match field {
            ThemeField::Background => &mut self.bg_color,
            ThemeField::Text => &mut self.text_color,
            ThemeField::Button => &mut self.btn_bg,
            ThemeField::ButtonHover => &mut self.btn_hover,
            ThemeField::Label => &mut self.label_bg,
            ThemeField::Menu => &mut self.menu_bg,
            ThemeField::MenuText => &mut self.menu_text,
            ThemeField::MainBorder => &mut self.main_border_color,
            ThemeField::NextBorder => &mut self.next_border_color,
        };
        *slot = color;
    }

    pub fn reset_to_defaults(&mut self) {
        *self = Self::default();
    }
}

// --- Settings ---

fn default_true() -> bool {
    true
}

// Plain values first, tables last, so the TOML stays readable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub first_run: bool,
    #[serde(default)]
    pub theme_mode: ThemeMode,
    #[serde(default)]
    pub recent_folders: Vec<PathBuf>,
    #[serde(default)]
    pub custom_theme: Theme,
    #[serde(default = "FolderSlot::defaults")]
    pub folders: Vec<FolderSlot>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            first_run: true,
            theme_mode: ThemeMode::default(),
            recent_folders: Vec::new(),
            custom_theme: Theme::default(),
            folders: FolderSlot::defaults(),
        }
    }
}

impl Settings {
    pub fn theme(&self) -> Theme {
        Theme::for_mode(self.theme_mode, &self.custom_theme)
    }

    /// Most recent first, no duplicates, capped.
    pub fn add_recent_folder(&mut self, folder: &Path) {
        self.recent_folders.retain(|f| !same_path(f, folder));
        self.recent_folders.insert(0, folder.to_path_buf());
        self.recent_folders.truncate(MAX_RECENT_FOLDERS);
    }

    pub fn prune_recent_folders(&mut self) {
        self.recent_folders.retain(|f| f.is_dir());
    }

    pub fn clear_recent_folders(&mut self) {
        self.recent_folders.clear();
    }

    /// `slot` is 1-based, as shown to the user.
    pub fn set_folder(&mut self, slot: usize, name: &str, path: &Path) -> Result<(), SortError> {
        let entry = slot
            .checked_sub(1)
            .and_then(|i| self.folders.get_mut(i))
            .ok_or(SortError::UnknownSlot(slot))?;
        entry.name = name.to_string();
        entry.path = path.to_path_buf();
        Ok(())
    }

    /// Exactly `SLOT_COUNT` slots, padding with placeholders.
    fn normalize_slots(&mut self) {
        self.folders.truncate(SLOT_COUNT);
        while self.folders.len() < SLOT_COUNT {
            self.folders.push(FolderSlot::placeholder(self.folders.len()));
        }
    }
}

/// Settings file, history file and log file, all in one directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_location() -> Result<Self, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(base.join(CONFIG_DIR_NAME)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::new(self.dir.join(HISTORY_FILE_NAME))
    }

    /// Loads settings, creating the file with defaults when absent and
    /// writing back defaults for sections an older file lacks.
    pub fn load(&self) -> Result<Settings, ConfigError> {
        fs::create_dir_all(&self.dir).map_err(|e| ConfigError::io(&self.dir, e))?;
        let path = self.settings_path();

        if !path.exists() {
            debug!(path = %path.display(), "settings file does not exist, creating defaults");
            let settings = Settings::default();
            self.save(&settings)?;
            return Ok(settings);
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
        let mut settings: Settings = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded settings");

        let raw: toml::Table = toml::from_str(&content)?;
        let missing: Vec<&str> = REQUIRED_SECTIONS.iter().copied().filter(|k| !raw.contains_key(*k)).collect();
        let slot_count = settings.folders.len();
        settings.normalize_slots();
        settings.prune_recent_folders();

        if !missing.is_empty() || slot_count != SLOT_COUNT {
            debug!(?missing, slot_count, "writing back default sections");
            self.save(&settings)?;
        }
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.dir).map_err(|e| ConfigError::io(&self.dir, e))?;
        let path = self.settings_path();
        write_settings(&path, settings)?;
        debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    pub fn export(&self, settings: &Settings, target: &Path) -> Result<(), ConfigError> {
        write_settings(target, settings)?;
        info!(path = %target.display(), "settings exported");
        Ok(())
    }

    /// Replaces the stored settings with `source` after checking that it
    /// carries every required section.
    pub fn import(&self, source: &Path) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(source).map_err(|e| ConfigError::io(source, e))?;
        let raw: toml::Table = toml::from_str(&content)?;
        if let Some(key) = REQUIRED_SECTIONS.iter().find(|k| !raw.contains_key(**k)) {
            return Err(ConfigError::InvalidSettings(key.to_string()));
        }

        let mut settings: Settings = toml::from_str(&content)?;
        settings.normalize_slots();
        settings.prune_recent_folders();
        self.save(&settings)?;
        info!(path = %source.display(), "settings imported");
        Ok(settings)
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let toml_str = toml::to_string_pretty(settings)?;
    fs::write(path, toml_str).map_err(|e| ConfigError::io(path, e))
}
