//! Config command implementation.

use anyhow::Result;

use latchkey_core::config::Config;

use super::{user_error, ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = super::load_config();
            print!("{}", config.to_toml().map_err(user_error)?);
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Reset => {
            Config::default().save().map_err(user_error)?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}
