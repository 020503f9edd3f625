use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigStore, HexColor, SLOT_COUNT, ThemeField, ThemeMode};
use crate::error::SortError;
use crate::fileops::FileSystem;
use crate::session::Session;
use crate::view::ExtensionFilter;

mod config;
mod cursor;
mod error;
mod fileops;
mod ledger;
mod resolver;
mod scanner;
mod session;
mod ui;
mod view;

const LOG_ENV: &str = "IMGSORT_LOG";

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Sorts images into destination folders, one keypress at a time.", long_about = None)]
struct Cli {
    /// Folder to sort (defaults to the most recently used one)
    folder: Option<PathBuf>,

    /// Include images in subfolders
    #[arg(long)]
    recursive: bool,

    /// Only show one extension, e.g. "jpg"
    #[arg(long, value_name = "EXT")]
    filter: Option<String>,

    /// Directory holding settings, history and the log file
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Configure a destination slot, e.g. 1=Keep=/photos/keep
    #[arg(long = "set-folder", value_name = "N=NAME=PATH")]
    set_folder: Vec<String>,

    /// Color scheme of the UI
    #[arg(long, value_enum, value_name = "MODE")]
    theme_mode: Option<ThemeMode>,

    /// Set a custom theme color and switch to the custom theme, e.g. main-border=#FF8800
    #[arg(long = "set-color", value_name = "FIELD=#RRGGBB")]
    set_color: Vec<String>,

    /// Restore the custom theme's default colors
    #[arg(long)]
    reset_theme: bool,

    /// Forget the recently used folders
    #[arg(long)]
    clear_recent: bool,

    #[arg(long, short)]
    verbose: bool,

    /// Undo the most recent move and exit
    #[arg(long)]
    undo: bool,

    /// Print the move history and exit
    #[arg(long)]
    list_history: bool,

    /// Restore default settings, clear the history and exit
    #[arg(long)]
    reset: bool,

    /// Print the active theme colors and exit
    #[arg(long)]
    show_theme: bool,

    #[arg(long, value_name = "FILE")]
    export_settings: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    import_settings: Option<PathBuf>,
}

impl Cli {
    fn validate(&self) -> Result<(), String> {
        for spec in &self.set_folder {
            parse_slot_spec(spec)?;
        }
        for spec in &self.set_color {
            parse_color_spec(spec)?;
        }

        if let Some(ref token) = self.filter {
            token.parse::<ExtensionFilter>().map_err(|e| e.to_string())?;
        }

        if let Some(ref dir) = self.folder {
            if !dir.exists() {
                return Err(format!("Folder does not exist: {:?}", dir));
            }
            if !dir.is_dir() {
                return Err(format!("Not a directory: {:?}", dir));
            }
        }

        if let Some(ref file) = self.import_settings
            && !file.is_file()
        {
            return Err(format!("Settings file does not exist: {:?}", file));
        }

        let one_shots = [
            self.undo,
            self.list_history,
            self.reset,
            self.show_theme,
            self.export_settings.is_some(),
            self.import_settings.is_some(),
        ];
        if one_shots.iter().filter(|&&b| b).count() > 1 {
            return Err(
                "Use only one of --undo, --list-history, --reset, --show-theme, --export-settings, --import-settings"
                    .to_string(),
            );
        }

        Ok(())
    }

    fn is_one_shot(&self) -> bool {
        self.undo
            || self.list_history
            || self.reset
            || self.show_theme
            || self.export_settings.is_some()
            || self.import_settings.is_some()
    }
}

/// `N=NAME=PATH`, with N in 1..=5. The path may itself contain `=`.
fn parse_slot_spec(spec: &str) -> Result<(usize, String, PathBuf), String> {
    let mut parts = spec.splitn(3, '=');
    let (Some(slot), Some(name), Some(path)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("Invalid --set-folder '{}'. Expected N=NAME=PATH", spec));
    };
    let slot: usize = slot
        .trim()
        .parse()
        .map_err(|_| format!("Invalid slot number '{}' in --set-folder", slot))?;
    if !(1..=SLOT_COUNT).contains(&slot) {
        return Err(format!("Slot must be 1-{}. Got {}.", SLOT_COUNT, slot));
    }
    if name.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("Invalid --set-folder '{}'. Name and path must not be empty", spec));
    }
    Ok((slot, name.trim().to_string(), PathBuf::from(path.trim())))
}

/// `FIELD=#RRGGBB`, FIELD being one of the theme color keys.
fn parse_color_spec(spec: &str) -> Result<(ThemeField, HexColor), String> {
    let (field, color) = spec
        .split_once('=')
        .ok_or_else(|| format!("Invalid --set-color '{}'. Expected FIELD=#RRGGBB", spec))?;
    Ok((field.parse()?, color.parse()?))
}

/// The UI owns the terminal, so it logs to a file; one-shot commands log
/// to stderr.
fn init_logging(config: &ConfigStore, verbose: bool, to_file: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("imgsort=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    if to_file {
        fs::create_dir_all(config.dir()).with_context(|| format!("creating {}", config.dir().display()))?;
        let log_path = config.log_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening log file {}", log_path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
    }
    Ok(())
}

fn print_history(session: &Session) {
    if session.ledger().is_empty() {
        println!("No moves recorded.");
        return;
    }
    for (i, record) in session.ledger().records().iter().enumerate() {
        let marker = if session.fs().exists(&record.current_path) { " " } else { "!" };
        println!(
            "{}[{}] {} -> {}",
            marker,
            i + 1,
            record.original_path.display(),
            record.current_path.display()
        );
    }
}

fn print_theme(session: &Session) {
    let theme = session.settings.theme();
    println!("Theme mode: {}", session.settings.theme_mode);
    for field in ThemeField::ALL {
        println!("  {:<12} {}  ({})", field.key(), theme.get(field), field.label());
    }
}

fn export_settings(config: &ConfigStore, session: &Session, target: &Path) -> anyhow::Result<()> {
    config
        .export(&session.settings, target)
        .with_context(|| format!("exporting settings to {}", target.display()))?;
    println!("Settings exported to {}", target.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let config = match &args.config_dir {
        Some(dir) => ConfigStore::new(dir),
        None => ConfigStore::default_location()?,
    };
    init_logging(&config, args.verbose, !args.is_one_shot())?;

    if let Some(ref source) = args.import_settings {
        config
            .import(source)
            .with_context(|| format!("importing settings from {}", source.display()))?;
        println!("Settings imported from {}", source.display());
        return Ok(());
    }

    let mut session = Session::open(config.clone()).context("loading settings and history")?;
    if args.is_one_shot()
        && let Some((msg, true)) = &session.status_message
    {
        eprintln!("Warning: {}", msg);
    }

    for spec in &args.set_folder {
        let (slot, name, path) = parse_slot_spec(spec).map_err(anyhow::Error::msg)?;
        session.set_folder(slot, &name, &path)?.into_result().context("saving settings")?;
        info!(slot, name = %name, path = %path.display(), "destination configured");
    }

    if args.clear_recent {
        session.clear_recent_folders().into_result().context("saving settings")?;
    }
    if args.reset_theme {
        session.reset_theme().into_result().context("saving settings")?;
    }
    for spec in &args.set_color {
        let (field, color) = parse_color_spec(spec).map_err(anyhow::Error::msg)?;
        session.set_theme_color(field, color).into_result().context("saving settings")?;
    }
    if let Some(mode) = args.theme_mode {
        session.set_theme_mode(mode).into_result().context("saving settings")?;
    }

    if args.show_theme {
        print_theme(&session);
        return Ok(());
    }

    if let Some(ref target) = args.export_settings {
        return export_settings(&config, &session, target);
    }

    if args.list_history {
        print_history(&session);
        return Ok(());
    }

    if args.undo {
        match session.undo() {
            Ok(done) => {
                println!("Restored {}", done.value.display());
                done.into_result().context("saving history")?;
            }
            Err(SortError::NothingToUndo) => println!("{}", SortError::NothingToUndo),
            Err(e) => bail!(e),
        }
        return Ok(());
    }

    if args.reset {
        session.reset().into_result().context("saving reset settings and history")?;
        println!("Settings reset to defaults and history cleared.");
        return Ok(());
    }

    // --- Interactive ---

    if session.settings.first_run {
        if session.settings.folders.iter().all(|f| f.is_placeholder()) {
            eprintln!("Hint: configure destination folders with --set-folder 1=Name=/path/to/folder");
        }
        session.settings.first_run = false;
        if let Err(e) = config.save(&session.settings) {
            eprintln!("Warning: could not save settings: {}", e);
        }
    }

    if let Some(ref token) = args.filter {
        session.set_filter(token.parse()?);
    }

    let folder = match &args.folder {
        Some(dir) => Some(fs::canonicalize(dir).with_context(|| format!("resolving {}", dir.display()))?),
        None => session.settings.recent_folders.first().cloned(),
    };
    if folder.is_none() && session.status_message.is_none() {
        session.status_message = Some(("No folder loaded. Start imgsort with a folder to sort.".to_string(), false));
    }

    let mut app = ui::TuiApp::new(session, args.recursive);
    if let Some(folder) = folder {
        app.start_import(folder);
    }
    app.run().context("terminal UI failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("imgsort").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_slot_spec() {
        assert_eq!(
            parse_slot_spec("2=Keepers=/photos/keep=2024").unwrap(),
            (2, "Keepers".to_string(), PathBuf::from("/photos/keep=2024"))
        );
        assert!(parse_slot_spec("0=A=/x").is_err());
        assert!(parse_slot_spec("6=A=/x").is_err());
        assert!(parse_slot_spec("one=A=/x").is_err());
        assert!(parse_slot_spec("1=/x").is_err());
        assert!(parse_slot_spec("1= =/x").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(cli(&[]).validate().is_ok());
        assert!(cli(&["--filter", "jpg", "--set-folder", "1=A=/tmp/a"]).validate().is_ok());
        assert!(cli(&["--filter", "docx"]).validate().is_err());
        assert!(cli(&["--undo", "--reset"]).validate().is_err());
        assert!(cli(&["/definitely/not/here"]).validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_string_lossy().to_string();
        assert!(cli(&[folder.as_str(), "--recursive"]).validate().is_ok());
        assert!(cli(&["--list-history"]).is_one_shot());
        assert!(cli(&["--show-theme"]).is_one_shot());
        assert!(!cli(&["--theme-mode", "light", "--clear-recent"]).is_one_shot());
        assert!(cli(&["--show-theme", "--reset"]).validate().is_err());
        assert!(cli(&["--set-color", "menu=#112233", "--reset-theme"]).validate().is_ok());
        assert!(cli(&["--set-color", "menu=112233"]).validate().is_err());
        assert!(Cli::try_parse_from(["imgsort", "--theme-mode", "sepia"]).is_err());
    }

    #[test]
    fn test_parse_color_spec() {
        assert_eq!(
            parse_color_spec("main-border=#ff8800").unwrap(),
            (ThemeField::MainBorder, HexColor::rgb(0xFF, 0x88, 0x00))
        );
        assert!(parse_color_spec("main-border").is_err());
        assert!(parse_color_spec("glow=#ff8800").is_err());
    }

    #[test]
    fn test_theme_mode_flag() {
        assert_eq!(cli(&["--theme-mode", "custom"]).theme_mode, Some(ThemeMode::Custom));
        assert_eq!(cli(&[]).theme_mode, None);
    }
}
