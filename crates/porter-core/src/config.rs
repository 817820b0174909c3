use std::{env, fs, path::Path, time::Duration};

use crate::{domain::GuildId, errors::Error, Result};

/// Typed configuration for the bot.
///
/// Platform limits (message length, attachment size, entity ceiling) are
/// deliberately *not* configurable; they live as constants next to the code
/// that enforces them.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub discord_token: String,
    pub home_guild_id: GuildId,

    // Proxy identity used for relocated messages
    pub proxy_name: String,

    // Entity mentions
    pub github_org: String,
    pub github_repo: String,
    pub github_token: Option<String>,

    // Cache time-to-refresh windows
    pub entity_ttr: Duration,
    pub image_probe_ttr: Duration,

    // Interactive controls are stripped from mirrors after this long
    pub control_timeout: Duration,

    // Role ids gating the move command and mirror controls
    pub mod_role_id: Option<u64>,
    pub helper_role_id: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let discord_token = env_str("DISCORD_TOKEN").unwrap_or_default();
        if discord_token.trim().is_empty() {
            return Err(Error::Config(
                "DISCORD_TOKEN environment variable is required".to_string(),
            ));
        }
        let home_guild_id = env_u64("HOME_GUILD_ID").ok_or_else(|| {
            Error::Config("HOME_GUILD_ID environment variable is required".to_string())
        })?;

        let proxy_name =
            env_str("PROXY_NAME").unwrap_or_else(|| "Community Moderator".to_string());

        // Entity mention defaults: bare `#123` resolves against this repo.
        let github_org = env_str("GITHUB_ORG").unwrap_or_else(|| "porter-bot".to_string());
        let github_repo = env_str("GITHUB_REPO").unwrap_or_else(|| "porter".to_string());
        let github_token = env_str("GITHUB_TOKEN").and_then(non_empty);

        let entity_ttr = Duration::from_secs(env_u64("ENTITY_TTR_SECS").unwrap_or(1800));
        let image_probe_ttr =
            Duration::from_secs(env_u64("IMAGE_PROBE_TTR_SECS").unwrap_or(1800));
        let control_timeout =
            Duration::from_secs(env_u64("CONTROL_TIMEOUT_SECS").unwrap_or(30));

        let mod_role_id = env_u64("MOD_ROLE_ID");
        let helper_role_id = env_u64("HELPER_ROLE_ID");

        Ok(Self {
            discord_token,
            home_guild_id: GuildId(home_guild_id),
            proxy_name,
            github_org,
            github_repo,
            github_token,
            entity_ttr,
            image_probe_ttr,
            control_timeout,
            mod_role_id,
            helper_role_id,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
