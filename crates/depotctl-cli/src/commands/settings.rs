use anyhow::{Context, Result, bail};
use colored::Colorize;
use depotctl_core::settings::{Settings, TransportKind};
use std::path::PathBuf;
use std::str::FromStr;

use super::AppContext;

pub const KEYS: &[&str] = &[
    "tool_root",
    "username",
    "build_output",
    "login_timeout_secs",
    "operation_timeout_secs",
    "second_factor_retries",
    "transport",
    "launch_grace_ms",
    "extra_args",
];

pub fn show(ctx: &AppContext) -> Result<()> {
    let stored = ctx.settings.stored()?;
    let effective = ctx.settings.get()?;

    println!("{}", format!("# {}", ctx.paths.settings_file().display()).dimmed());
    print!("{}", toml::to_string_pretty(&stored)?);
    if effective.tool_root != stored.tool_root {
        if let Some(root) = &effective.tool_root {
            println!(
                "{}",
                format!("# tool_root overridden by environment: {}", root.display()).yellow()
            );
        }
    }
    Ok(())
}

pub fn set(ctx: &AppContext, key: &str, value: &str) -> Result<()> {
    ctx.settings.update(|s| {
        apply_setting(s, key, value).map_err(|e| depotctl_core::DepotError::validation(key, e.to_string()))
    })?;
    println!("{} {} = {}", "✓".green(), key, value);
    Ok(())
}

pub fn unset(ctx: &AppContext, key: &str) -> Result<()> {
    ctx.settings.update(|s| {
        reset_setting(s, key).map_err(|e| depotctl_core::DepotError::validation(key, e.to_string()))
    })?;
    println!("{} {} reset to default", "✓".green(), key);
    Ok(())
}

/// Parses `value` into the field named `key`.
pub fn apply_setting(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "tool_root" => settings.tool_root = Some(non_empty_path(value)?),
        "username" => {
            let value = value.trim();
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                bail!("must be a single non-empty word");
            }
            settings.username = Some(value.to_string());
        }
        "build_output" => settings.build_output = Some(non_empty_path(value)?),
        "login_timeout_secs" => settings.login_timeout_secs = positive(value)?,
        "operation_timeout_secs" => settings.operation_timeout_secs = positive(value)?,
        "second_factor_retries" => {
            settings.second_factor_retries = u32::try_from(positive(value)?)
                .context("too large")?;
        }
        "transport" => {
            settings.transport = TransportKind::from_str(value.trim())
                .map_err(|_| anyhow::anyhow!("expected 'pipe' or 'window'"))?;
        }
        "launch_grace_ms" => {
            settings.launch_grace_ms = value.trim().parse().context("expected milliseconds")?;
        }
        "extra_args" => {
            settings.extra_args = value.split_whitespace().map(str::to_string).collect();
        }
        other => bail!("unknown setting '{}' (known: {})", other, KEYS.join(", ")),
    }
    Ok(())
}

/// Restores the default value of `key`.
pub fn reset_setting(settings: &mut Settings, key: &str) -> Result<()> {
    let defaults = Settings::default();
    match key {
        "tool_root" => settings.tool_root = defaults.tool_root,
        "username" => settings.username = defaults.username,
        "build_output" => settings.build_output = defaults.build_output,
        "login_timeout_secs" => settings.login_timeout_secs = defaults.login_timeout_secs,
        "operation_timeout_secs" => {
            settings.operation_timeout_secs = defaults.operation_timeout_secs
        }
        "second_factor_retries" => {
            settings.second_factor_retries = defaults.second_factor_retries
        }
        "transport" => settings.transport = defaults.transport,
        "launch_grace_ms" => settings.launch_grace_ms = defaults.launch_grace_ms,
        "extra_args" => settings.extra_args = defaults.extra_args,
        other => bail!("unknown setting '{}' (known: {})", other, KEYS.join(", ")),
    }
    Ok(())
}

fn non_empty_path(value: &str) -> Result<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        bail!("path must not be empty");
    }
    Ok(PathBuf::from(value))
}

fn positive(value: &str) -> Result<u64> {
    let n: u64 = value.trim().parse().context("expected a positive integer")?;
    if n == 0 {
        bail!("must be greater than zero");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_parses_each_kind() {
        let mut settings = Settings::default();
        apply_setting(&mut settings, "tool_root", "/opt/sdk/tools/ContentBuilder").unwrap();
        apply_setting(&mut settings, "transport", "Window").unwrap();
        apply_setting(&mut settings, "login_timeout_secs", "45").unwrap();
        apply_setting(&mut settings, "extra_args", "+@NoPromptForPassword 1").unwrap();

        assert_eq!(
            settings.tool_root,
            Some(PathBuf::from("/opt/sdk/tools/ContentBuilder"))
        );
        assert_eq!(settings.transport, TransportKind::Window);
        assert_eq!(settings.login_timeout_secs, 45);
        assert_eq!(settings.extra_args, vec!["+@NoPromptForPassword", "1"]);
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut settings = Settings::default();
        assert!(apply_setting(&mut settings, "login_timeout_secs", "0").is_err());
        assert!(apply_setting(&mut settings, "login_timeout_secs", "soon").is_err());
        assert!(apply_setting(&mut settings, "transport", "telnet").is_err());
        assert!(apply_setting(&mut settings, "username", "two words").is_err());
        assert!(apply_setting(&mut settings, "colour", "red").is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_reset_restores_default() {
        let mut settings = Settings::default();
        apply_setting(&mut settings, "username", "builder").unwrap();
        apply_setting(&mut settings, "second_factor_retries", "5").unwrap();

        reset_setting(&mut settings, "username").unwrap();
        reset_setting(&mut settings, "second_factor_retries").unwrap();
        assert_eq!(settings, Settings::default());
    }
}
