use crate::{
    cas::{CasConfig, ProtocolVersion},
    cli::actions::{server::Args, Action},
};
use anyhow::{Context, Result};
use std::time::Duration;

fn strings(matches: &clap::ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| {
            values
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn seconds(matches: &clap::ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("missing required argument: --{id}"))
}

/// Group `NAME=VALUE` pairs by name, keeping first-seen order.
fn group_pairs<'a>(pairs: impl Iterator<Item = &'a (String, String)>) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in pairs {
        match grouped.iter_mut().find(|(known, _)| known == name) {
            Some((_, values)) => values.push(value.clone()),
            None => grouped.push((name.clone(), vec![value.clone()])),
        }
    }
    grouped
}

/// # Errors
/// Returns an error if required arguments are missing or the CAS configuration is invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let cas_url = matches
        .get_one::<String>("cas-url")
        .context("missing required argument: --cas-url")?;
    let service_url = matches
        .get_one::<String>("service-url")
        .context("missing required argument: --service-url")?;
    let version = matches
        .get_one::<ProtocolVersion>("cas-version")
        .copied()
        .unwrap_or_default();

    let mut config = CasConfig::new(cas_url, service_url)
        .context("invalid CAS configuration")?
        .with_version(version)
        .with_attributes(strings(matches, "attributes"))
        .with_proxy(matches.get_flag("proxy"))
        .with_connect_timeout(seconds(matches, "connect-timeout")?)
        .with_request_timeout(seconds(matches, "request-timeout")?);

    if let Some(key) = matches.get_one::<String>("username-key") {
        config = config.with_username_key(key.clone());
    }
    if let Some(key) = matches.get_one::<String>("attributes-key") {
        config = config.with_attributes_key(key.clone());
    }
    if let Some(path) = matches.get_one::<String>("login-path") {
        config = config.with_login_path(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("finish-path") {
        config = config.with_finish_path(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("logout-path") {
        config = config.with_logout_path(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("proxy-path") {
        config = config.with_proxy_path(path.clone());
    }
    if let Some(path) = matches.get_one::<String>("pgt-callback-path") {
        config = config.with_pgt_callback_path(path.clone());
    }

    let allow_attributes = matches
        .get_many::<(String, String)>("allow-attribute")
        .map(group_pairs)
        .unwrap_or_default();

    Ok(Action::Server(Args {
        port,
        config,
        session_idle: seconds(matches, "session-idle")?,
        lowercase_usernames: matches.get_flag("lowercase-usernames"),
        required_attributes: strings(matches, "required-attributes"),
        allowed_users: strings(matches, "allowed-users"),
        allow_attributes,
        deny_anonymous: matches.get_flag("deny-anonymous"),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::commands;

    fn server_args(argv: &[&str]) -> Result<Args> {
        let matches = commands::new().try_get_matches_from(argv)?;
        let Action::Server(args) = handler(&matches)?;
        Ok(args)
    }

    #[test]
    fn builds_cas_config_from_flags() {
        temp_env::with_vars_unset(
            [
                "CASC_PROXY",
                "CASC_CAS_VERSION",
                "CASC_LOG_LEVEL",
                "CASC_LOGIN_PATH",
                "CASC_LOGOUT_PATH",
                "CASC_PROXY_PATH",
            ],
            || {
                let args = server_args(&[
                    "casc",
                    "--cas-url",
                    "https://cas.tld/cas",
                    "--service-url",
                    "https://app.tld",
                    "--cas-version",
                    "3",
                    "--attributes",
                    "mail, groups,,mail",
                    "--allow-attribute",
                    "groups=sysadmin",
                    "--allow-attribute",
                    "eduPersonAffiliation=staff",
                    "--allow-attribute",
                    "groups=ops",
                    "--proxy",
                    "--login-path",
                    "/sso/login",
                    "--logout-path",
                    "/sso/logout",
                ])
                .unwrap();

                assert_eq!(args.config.version(), ProtocolVersion::V3);
                assert_eq!(args.config.attributes(), ["mail", "groups"]);
                assert!(args.config.proxy());
                assert_eq!(args.config.login_path(), "/sso/login");
                assert_eq!(args.config.logout_path(), "/sso/logout");
                assert_eq!(args.config.proxy_path(), "/casc/proxy");
                assert_eq!(args.config.request_timeout(), Duration::from_secs(10));
                assert_eq!(
                    args.allow_attributes,
                    vec![
                        (
                            "groups".to_string(),
                            vec!["sysadmin".to_string(), "ops".to_string()]
                        ),
                        ("eduPersonAffiliation".to_string(), vec!["staff".to_string()]),
                    ]
                );
            },
        );
    }

    #[test]
    fn rejects_relative_cas_url() {
        temp_env::with_vars_unset(["CASC_LOG_LEVEL"], || {
            let result = server_args(&[
                "casc",
                "--cas-url",
                "cas.tld/cas",
                "--service-url",
                "https://app.tld",
            ]);
            assert!(result.is_err());
        });
    }
}
