use std::path::{Path, PathBuf};

/// Overrides the data directory, mainly for tests and portable installs.
pub const HOME_ENV: &str = "MIRROR_CORE_HOME";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(dir) = std::env::var(HOME_ENV) {
    if !dir.trim().is_empty() {
      return Ok(PathBuf::from(dir));
    }
  }

  if cfg!(windows) {
    let app_data = std::env::var("APPDATA")
      .map_err(|_| anyhow::anyhow!("APPDATA is not set; set {HOME_ENV} instead"))?;
    return Ok(PathBuf::from(app_data).join("mirror-core"));
  }

  let home = std::env::var("HOME")
    .map_err(|_| anyhow::anyhow!("HOME is not set; set {HOME_ENV} instead"))?;
  Ok(PathBuf::from(home).join(".mirror-core"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn reachability_state_path(base: &Path) -> PathBuf {
  base.join("reachability.json")
}
