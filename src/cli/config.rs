use anyhow::Result;
use clap::{Args, Subcommand};
use vellum_client::ClientConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
}

pub fn cmd_config(args: ConfigArgs, config: &ClientConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            print!("{}", serde_yaml::to_string(config)?);
        }
    }
    Ok(())
}
