use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const PROJECT_CONFIG_NAME: &str = ".logweaverc";
const APP_DIR_NAME: &str = "logweave";

/// Configuration file handler for logweave
///
/// The file is INI-like. Only the root-level `defaults` key is used: its value
/// is split like a shell command line and placed in front of the real
/// arguments, so anything given on the command line wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub defaults: Option<String>,
}

impl ConfigFile {
    /// Find project-level .logweaverc by walking up from `start`
    pub fn find_project_config_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            let config_path = current.join(PROJECT_CONFIG_NAME);
            if config_path.is_file() {
                return Some(config_path);
            }
            if !current.pop() {
                // Reached filesystem root
                return None;
            }
        }
    }

    pub fn find_project_config() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        Self::find_project_config_from(&cwd)
    }

    /// User config file locations in order of preference:
    /// `<config dir>/logweave/config.ini`, then `~/.logweaverc`
    pub fn get_user_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_DIR_NAME).join("config.ini"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(PROJECT_CONFIG_NAME));
        }
        paths
    }

    /// Load configuration with precedence: project > user
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::get_user_config_paths()
            .into_iter()
            .find(|p| p.is_file())
        {
            config = Self::merge_configs(config, Self::load_from_path(&path)?);
        }

        if let Some(project_path) = Self::find_project_config() {
            config = Self::merge_configs(config, Self::load_from_path(&project_path)?);
        }

        Ok(config)
    }

    /// Load configuration with optional custom config file path
    pub fn load_with_custom_path(custom_path: Option<&str>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(Path::new(path)),
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Ok(Self::parse_ini_content(&content))
    }

    fn parse_ini_content(content: &str) -> Self {
        let mut defaults = None;
        let mut in_section = false;

        for line in content.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                in_section = true;
                continue;
            }

            // Unknown sections and keys are ignored
            if let Some((key, value)) = line.split_once('=') {
                if !in_section && key.trim() == "defaults" {
                    defaults = Some(value.trim().to_string());
                }
            }
        }

        Self { defaults }
    }

    fn merge_configs(base: Self, overlay: Self) -> Self {
        Self {
            defaults: overlay.defaults.or(base.defaults),
        }
    }

    /// Describe which configuration would be used and where it was searched
    pub fn describe() -> String {
        let mut out = String::new();
        out.push_str("Configuration precedence: CLI > project .logweaverc > user config\n\n");

        let project_config_path = Self::find_project_config();
        let user_config_paths = Self::get_user_config_paths();
        let user_config_path = user_config_paths.iter().find(|p| p.is_file());

        match Self::load() {
            Ok(merged) => {
                if project_config_path.is_none() && user_config_path.is_none() {
                    out.push_str("No configuration files found. Using defaults.\n");
                } else {
                    out.push_str("Configuration loaded from:\n");
                    if let Some(path) = &project_config_path {
                        out.push_str(&format!("  Project: {}\n", path.display()));
                    }
                    if let Some(path) = user_config_path {
                        out.push_str(&format!("  User: {}\n", path.display()));
                    }
                }
                if let Some(defaults) = &merged.defaults {
                    out.push_str(&format!("\nActive defaults:\n  defaults = {}\n", defaults));
                }
            }
            Err(e) => out.push_str(&format!("Error loading configuration: {:#}\n", e)),
        }

        out.push_str("\nConfiguration search locations (in precedence order):\n");
        match &project_config_path {
            Some(path) => out.push_str(&format!("  1. Project: {} (found)\n", path.display())),
            None => out.push_str(
                "  1. Project: .logweaverc (searched up directory tree, not found)\n",
            ),
        }
        for (i, path) in user_config_paths.iter().enumerate() {
            let status = if path.is_file() { "(found)" } else { "(not found)" };
            out.push_str(&format!("  {}. User: {} {}\n", i + 2, path.display(), status));
        }

        if project_config_path.is_none() && user_config_path.is_none() {
            out.push_str("\nExample configuration file (.logweaverc):\n\n");
            out.push_str("# Default arguments applied to every logweave command\n");
            out.push_str("defaults = --pace 500ms --threads 8 --stats\n");
        }

        out
    }

    /// Put the configured defaults in front of the user's arguments
    pub fn process_args(&self, args: Vec<String>) -> Result<Vec<String>> {
        let Some(defaults) = &self.defaults else {
            return Ok(args);
        };

        let default_args = shell_words::split(defaults)
            .context("Invalid defaults: failed to parse arguments")?;

        let mut args = args.into_iter();
        let mut result = Vec::new();
        // Keep program name
        result.extend(args.next());
        result.extend(default_args);
        result.extend(args);
        Ok(result)
    }
}

/// Apply the config file unless the command line opts out of it.
///
/// `--ignore-config` and `--config-file` are read from the raw arguments since
/// they decide how the rest is parsed.
pub fn process_args_with_config(args: Vec<String>) -> Result<Vec<String>> {
    if args.iter().any(|a| a == "--ignore-config") {
        return Ok(args);
    }

    let custom_path = find_config_file_arg(&args);
    let config = ConfigFile::load_with_custom_path(custom_path.as_deref())?;
    config.process_args(args)
}

fn find_config_file_arg(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config-file" {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix("--config-file=") {
            return Some(value.to_string());
        }
    }
    None
}
