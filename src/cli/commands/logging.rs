use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_LEVEL: &str = "log-level";

/// Level names or numbers, on the same scale as the `-v` count.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 4 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level, expected error, warn, info, debug or trace".to_string()),
        }
    })
}

/// `-v` counts occurrences and cannot read the environment, so the env
/// fallback lives on a separate `--log-level` argument.
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Increase verbosity: -v WARN, -vv INFO, -vvv DEBUG, -vvvv TRACE (default: ERROR)")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .long("log-level")
                .help("Log level when -v is not given: error, warn, info, debug, trace")
                .env("CASC_LOG_LEVEL")
                .global(true)
                .value_parser(validator_log_level()),
        )
}

/// Effective verbosity: the `-v` count wins over `--log-level`.
#[must_use]
pub fn verbosity(matches: &ArgMatches) -> u8 {
    match matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0) {
        0 => matches.get_one::<u8>(ARG_LOG_LEVEL).copied().unwrap_or(0),
        count => count,
    }
}
