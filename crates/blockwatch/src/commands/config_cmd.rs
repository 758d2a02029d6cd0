//! Config subcommand handlers.

use std::fmt::Write as _;

use blockwatch_config::Config;
use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util::{self, prompt_err};

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking the token.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();
    let d = &cfg.discord;
    let _ = writeln!(out, "[discord]");
    if d.token.is_some() {
        let _ = writeln!(out, "token = \"****\"");
    }
    let _ = writeln!(out, "token_env = \"{}\"", d.token_env);
    let _ = writeln!(out, "api_base = \"{}\"", d.api_base);
    let _ = writeln!(out, "gateway_url = \"{}\"", d.gateway_url);
    let _ = writeln!(out, "command_prefix = \"{}\"", d.command_prefix);
    let _ = writeln!(out, "http_timeout_secs = {}", d.http_timeout_secs);

    let m = &cfg.monitor;
    let _ = writeln!(out);
    let _ = writeln!(out, "[monitor]");
    let _ = writeln!(out, "poll_interval_secs = {}", m.poll_interval_secs);
    let _ = writeln!(out, "cooldown_secs = {}", m.cooldown_secs);
    let _ = writeln!(out, "query_timeout_ms = {}", m.query_timeout_ms);
    let _ = writeln!(out, "default_port = {}", m.default_port);

    let _ = writeln!(out);
    let _ = writeln!(out, "[storage]");
    let _ = write!(out, "database = \"{}\"", cfg.storage.database_path().display());
    out
}

fn prompt_token() -> Result<String, CliError> {
    let token = rpassword::prompt_password("Bot token: ").map_err(prompt_err)?;
    let token = token.trim().to_owned();
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "bot token cannot be empty".into(),
        });
    }
    Ok(token)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),

        ConfigCommand::Show => {
            let cfg = util::load_config(global)?;
            output::print_output(&format_config_redacted(&cfg), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&util::config_file(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::SetToken => {
            let token = prompt_token()?;
            blockwatch_config::store_token(&token)?;
            if !global.quiet {
                eprintln!("Bot token stored in system keyring");
            }
            Ok(())
        }
    }
}

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let path = util::config_file(global);
    eprintln!("blockwatch configuration wizard");
    eprintln!("   Config path: {}\n", path.display());

    if path.exists() && !util::confirm("A config file already exists. Overwrite it?", "config init", global.yes)? {
        return Ok(());
    }

    let mut cfg = Config::default();

    cfg.discord.command_prefix = Input::new()
        .with_prompt("Command prefix")
        .default(cfg.discord.command_prefix.clone())
        .interact_text()
        .map_err(prompt_err)?;

    cfg.monitor.poll_interval_secs = Input::new()
        .with_prompt("Poll interval (seconds)")
        .default(cfg.monitor.poll_interval_secs)
        .interact_text()
        .map_err(prompt_err)?;

    let database: String = Input::new()
        .with_prompt("Database file")
        .default(cfg.storage.database_path().display().to_string())
        .interact_text()
        .map_err(prompt_err)?;
    cfg.storage.database = Some(database.into());

    let env_choice = format!("Read it from ${} at startup", cfg.discord.token_env);
    let choices = [
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
        env_choice.as_str(),
    ];
    let selection = Select::new()
        .with_prompt("Where should the bot token live?")
        .items(&choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;
    match selection {
        0 => {
            blockwatch_config::store_token(&prompt_token()?)?;
            eprintln!("   Bot token stored in system keyring");
        }
        1 => cfg.discord.token = Some(prompt_token()?),
        _ => {}
    }

    cfg.validate()?;
    blockwatch_config::save_config_to(&cfg, &path)?;
    eprintln!("\nConfig written to {}", path.display());
    Ok(())
}
