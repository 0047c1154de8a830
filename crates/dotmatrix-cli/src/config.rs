use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use dotmatrix_core::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmulationMode {
    #[default]
    Auto,
    ForceDmg,
    ForceCgb,
}

impl EmulationMode {
    /// Model to force, or `None` to follow the cartridge header.
    pub fn model(self) -> Option<Model> {
        match self {
            Self::Auto => None,
            Self::ForceDmg => Some(Model::Dmg),
            Self::ForceCgb => Some(Model::Cgb),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CliConfig {
    pub dmg_bootrom_path: Option<PathBuf>,
    pub cgb_bootrom_path: Option<PathBuf>,
    pub emulation_mode: EmulationMode,
    pub default_frames: Option<u32>,
}

impl CliConfig {
    pub fn bootrom_for(&self, model: Model) -> Option<&Path> {
        match model {
            Model::Dmg => self.dmg_bootrom_path.as_deref(),
            Model::Cgb => self.cgb_bootrom_path.as_deref(),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("dotmatrix").join("cli.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("dotmatrix")
            .join("cli.toml");
    }

    PathBuf::from("cli.toml")
}

pub fn load_from_file(path: &Path) -> CliConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return CliConfig::default(),
    };

    match toml::from_str::<CliConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse CLI config {}: {e}; using defaults",
                path.display()
            );
            CliConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_from_file(&dir.path().join("cli.toml"));
        assert_eq!(cfg, CliConfig::default());
    }

    #[test]
    fn parses_kebab_case_mode_and_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        fs::write(
            &path,
            "emulation_mode = \"force-cgb\"\n\
             cgb_bootrom_path = \"/roms/cgb_boot.bin\"\n\
             default_frames = 120\n",
        )
        .unwrap();

        let cfg = load_from_file(&path);
        assert_eq!(cfg.emulation_mode, EmulationMode::ForceCgb);
        assert_eq!(cfg.emulation_mode.model(), Some(Model::Cgb));
        assert_eq!(cfg.default_frames, Some(120));
        assert_eq!(
            cfg.bootrom_for(Model::Cgb),
            Some(Path::new("/roms/cgb_boot.bin"))
        );
        assert_eq!(cfg.bootrom_for(Model::Dmg), None);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        fs::write(&path, "emulation_mode = \"sideways\"\n").unwrap();
        assert_eq!(load_from_file(&path), CliConfig::default());
    }
}
