use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

pub const TEMPLATE_ENV: &str = "INFORME_TEMPLATE_FILE";
pub const OUTPUT_DIR_ENV: &str = "INFORME_OUTPUT_DIR";
pub const RULES_ENV: &str = "INFORME_RULES_FILE";

/// Paths the tool works with, from command-line flags or the environment
/// (a `.env` file next to the working directory is loaded at start-up).
#[derive(Debug, Clone)]
pub struct Settings {
    pub template: PathBuf,
    pub output_dir: PathBuf,
    pub rules: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(
        template: Option<&str>,
        output_dir: Option<&str>,
        rules: Option<&str>,
    ) -> Result<Self, Error> {
        let template = match template {
            Some(path) => path.to_string(),
            None => std::env::var(TEMPLATE_ENV).with_context(|| {
                format!(
                    "{} environment variable or --template is required. Set it in the .env file.",
                    TEMPLATE_ENV
                )
            })?,
        };
        let output_dir = output_dir
            .map(str::to_string)
            .or_else(|| std::env::var(OUTPUT_DIR_ENV).ok())
            .unwrap_or_else(|| ".".to_string());
        let rules = rules
            .map(str::to_string)
            .or_else(|| std::env::var(RULES_ENV).ok())
            .filter(|p| !p.trim().is_empty());

        Ok(Settings {
            template: expand_home(&template)?,
            output_dir: expand_home(&output_dir)?,
            rules: rules.as_deref().map(expand_home).transpose()?,
        })
    }
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf, Error> {
    match path.strip_prefix("~/") {
        Some(stripped) => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| Error::msg("Cannot expand ~ - HOME environment variable not set"))?;
            Ok(Path::new(&home).join(stripped))
        }
        None => Ok(PathBuf::from(path)),
    }
}

pub fn create_output_directory(dir: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory '{}'", dir.display()))
}
