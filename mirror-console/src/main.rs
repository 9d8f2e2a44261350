use anyhow::Context;
use mirror_core::{config, logging, paths};

mod console;

fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().skip(1).collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  let base = paths::base_dir()?;
  let cfg = config::load_or_create_default(&paths::config_path(&base)).context("load config")?;

  let log_dir = paths::logs_dir(&base);
  if console::is_long_running(&args) {
    logging::init_file_only(&log_dir, &cfg.logging.level, cfg.logging.retention_days)?;
  } else {
    logging::init_file_and_stderr(&log_dir, &cfg.logging.level, cfg.logging.retention_days)?;
  }

  console::run_console_command(&cfg, &base, &args).context("run console command")
}
