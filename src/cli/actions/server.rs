use crate::{
    api::{self, CasState},
    cas::{
        hooks::{lowercase_identity, require_attributes},
        AccessGuard, AttributeMatch, CasConfig, HookChain, HookChainBuilder, UserAllowlist,
    },
};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub config: CasConfig,
    pub session_idle: Duration,
    pub lowercase_usernames: bool,
    pub required_attributes: Vec<String>,
    pub allowed_users: Vec<String>,
    /// Attribute name and the values that grant access, in flag order.
    pub allow_attributes: Vec<(String, Vec<String>)>,
    pub deny_anonymous: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the HTTP client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let hooks = hook_chain(&args);
    let guard = access_guard(&args);
    let state = CasState::new(args.config, hooks, args.session_idle)
        .context("Failed to build CAS HTTP client")?;

    api::new(args.port, state, guard).await
}

/// Hooks in a fixed order: normalize first, then veto.
#[must_use]
pub fn hook_chain(args: &Args) -> HookChain {
    let mut builder = HookChainBuilder::new();
    if args.lowercase_usernames {
        builder = builder.register("lowercase-usernames", lowercase_identity);
    }
    if !args.required_attributes.is_empty() {
        builder = builder.register(
            "required-attributes",
            require_attributes(args.required_attributes.clone()),
        );
    }
    builder.build()
}

/// Guard for the protected routes built from the allowlist flags.
#[must_use]
pub fn access_guard(args: &Args) -> AccessGuard {
    let mut guard = AccessGuard::login_required();
    if !args.allowed_users.is_empty() {
        guard = guard.with(UserAllowlist::new(args.allowed_users.iter().cloned()));
    }
    for (name, values) in &args.allow_attributes {
        guard = guard.with(AttributeMatch::new(name.clone(), values.iter().cloned()));
    }
    if args.deny_anonymous {
        guard = guard.deny_anonymous();
    }
    guard
}

fn log_startup_args(args: &Args) {
    let config = &args.config;
    let join = |values: &[String]| {
        if values.is_empty() {
            "none".to_string()
        } else {
            values.join(",")
        }
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("cas_url", config.server_url().to_string()),
        ("service_url", config.service_url().to_string()),
        ("cas_version", config.version().to_string()),
        ("login_path", config.login_path().to_string()),
        ("finish_path", config.finish_path().to_string()),
        ("logout_path", config.logout_path().to_string()),
        ("attributes", join(config.attributes())),
        ("proxy", config.proxy().to_string()),
        ("proxy_path", config.proxy_path().to_string()),
        ("session_idle", format!("{}s", args.session_idle.as_secs())),
        ("allowed_users", join(&args.allowed_users)),
        (
            "allow_attributes",
            args.allow_attributes
                .iter()
                .map(|(name, values)| format!("{name}={}", values.join("|")))
                .collect::<Vec<_>>()
                .join(","),
        ),
        ("deny_anonymous", args.deny_anonymous.to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
