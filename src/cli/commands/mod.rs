pub mod logging;

use crate::cas::{
    config::{
        DEFAULT_ATTRIBUTES_KEY, DEFAULT_FINISH_PATH, DEFAULT_LOGIN_PATH, DEFAULT_LOGOUT_PATH,
        DEFAULT_PGT_CALLBACK_PATH, DEFAULT_PROXY_PATH, DEFAULT_USERNAME_KEY,
    },
    ProtocolVersion,
};
use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub fn validator_cas_version() -> ValueParser {
    ValueParser::from(move |version: &str| -> std::result::Result<ProtocolVersion, String> {
        version.parse::<ProtocolVersion>().map_err(|err| err.to_string())
    })
}

/// Local route paths must be absolute and distinct from `/`.
pub fn validator_route_path() -> ValueParser {
    ValueParser::from(move |path: &str| -> std::result::Result<String, String> {
        let path = path.trim();
        if path.len() > 1 && path.starts_with('/') && !path.contains(|c| c == '?' || c == '#') {
            Ok(path.to_string())
        } else {
            Err(format!("invalid route path {path:?}, expected /some/path"))
        }
    })
}

/// `name=value` for `--allow-attribute`.
pub fn validator_attribute_pair() -> ValueParser {
    ValueParser::from(move |pair: &str| -> std::result::Result<(String, String), String> {
        match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() && !value.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err("expected NAME=VALUE".to_string()),
        }
    })
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("casc")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CASC_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("cas-url")
                .long("cas-url")
                .help("CAS server base URL, example: https://cas.tld/cas")
                .env("CASC_CAS_URL")
                .required(true),
        )
        .arg(
            Arg::new("service-url")
                .long("service-url")
                .help("Public base URL of this application, example: https://app.tld")
                .env("CASC_SERVICE_URL")
                .required(true),
        )
        .arg(
            Arg::new("cas-version")
                .long("cas-version")
                .help("CAS protocol version: 1, 2 or 3")
                .default_value("2")
                .env("CASC_CAS_VERSION")
                .value_parser(validator_cas_version()),
        )
        .arg(
            Arg::new("attributes")
                .long("attributes")
                .help("Comma separated attributes to keep in the session")
                .env("CASC_ATTRIBUTES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("username-key")
                .long("username-key")
                .help("Session key holding the username")
                .default_value(DEFAULT_USERNAME_KEY)
                .env("CASC_USERNAME_KEY"),
        )
        .arg(
            Arg::new("attributes-key")
                .long("attributes-key")
                .help("Session key holding the attributes")
                .default_value(DEFAULT_ATTRIBUTES_KEY)
                .env("CASC_ATTRIBUTES_KEY"),
        )
        .arg(
            Arg::new("login-path")
                .long("login-path")
                .help("Path that starts a CAS login")
                .default_value(DEFAULT_LOGIN_PATH)
                .env("CASC_LOGIN_PATH")
                .value_parser(validator_route_path()),
        )
        .arg(
            Arg::new("finish-path")
                .long("finish-path")
                .help("Path the CAS server redirects back to with the ticket")
                .default_value(DEFAULT_FINISH_PATH)
                .env("CASC_FINISH_PATH")
                .value_parser(validator_route_path()),
        )
        .arg(
            Arg::new("logout-path")
                .long("logout-path")
                .help("Path that clears the session and logs out of CAS")
                .default_value(DEFAULT_LOGOUT_PATH)
                .env("CASC_LOGOUT_PATH")
                .value_parser(validator_route_path()),
        )
        .arg(
            Arg::new("proxy")
                .long("proxy")
                .help("Request a proxy granting ticket on login")
                .env("CASC_PROXY")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("proxy-path")
                .long("proxy-path")
                .help("Path that redirects to a backend service with a proxy ticket")
                .default_value(DEFAULT_PROXY_PATH)
                .env("CASC_PROXY_PATH")
                .value_parser(validator_route_path()),
        )
        .arg(
            Arg::new("pgt-callback-path")
                .long("pgt-callback-path")
                .help("Path the CAS server delivers proxy granting tickets to")
                .default_value(DEFAULT_PGT_CALLBACK_PATH)
                .env("CASC_PGT_CALLBACK_PATH")
                .value_parser(validator_route_path()),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .help("Seconds to wait for a connection to the CAS server")
                .default_value("5")
                .env("CASC_CONNECT_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("request-timeout")
                .long("request-timeout")
                .help("Seconds to wait for a CAS server answer")
                .default_value("10")
                .env("CASC_REQUEST_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("session-idle")
                .long("session-idle")
                .help("Seconds of inactivity before a session is dropped")
                .default_value("28800")
                .env("CASC_SESSION_IDLE")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("lowercase-usernames")
                .long("lowercase-usernames")
                .help("Lowercase usernames before they reach the session")
                .env("CASC_LOWERCASE_USERNAMES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("required-attributes")
                .long("required-attributes")
                .help("Comma separated attributes the CAS server must release, or the login is refused")
                .env("CASC_REQUIRED_ATTRIBUTES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("allowed-users")
                .long("allowed-users")
                .help("Comma separated users allowed on protected routes")
                .env("CASC_ALLOWED_USERS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("allow-attribute")
                .long("allow-attribute")
                .help("NAME=VALUE an attribute must hold on protected routes, repeatable")
                .env("CASC_ALLOW_ATTRIBUTE")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(validator_attribute_pair()),
        )
        .arg(
            Arg::new("deny-anonymous")
                .long("deny-anonymous")
                .help("Answer anonymous requests to protected routes with 401 instead of a login redirect")
                .env("CASC_DENY_ANONYMOUS")
                .action(ArgAction::SetTrue),
        );

    logging::with_args(command)
}
