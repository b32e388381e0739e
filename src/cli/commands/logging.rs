use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>()
            && parsed <= 4
        {
            return Ok(parsed);
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("AUTH_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
    .arg(
        Arg::new(ARG_LOG_FORMAT)
            .long(ARG_LOG_FORMAT)
            .help("Log output format")
            .env("AUTH_LOG_FORMAT")
            .global(true)
            .default_value("pretty")
            .value_parser(["pretty", "json"]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_flag_counts() {
        temp_env::with_vars([("AUTH_LOG_LEVEL", None::<&str>)], || {
            let matches = with_args(Command::new("test")).get_matches_from(["test", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }

    #[test]
    fn log_format_from_env() {
        temp_env::with_vars([("AUTH_LOG_FORMAT", Some("json"))], || {
            let matches = with_args(Command::new("test")).get_matches_from(["test"]);
            assert_eq!(
                matches.get_one::<String>(ARG_LOG_FORMAT).map(String::as_str),
                Some("json")
            );
        });
        temp_env::with_vars([("AUTH_LOG_FORMAT", None::<&str>)], || {
            let result = with_args(Command::new("test"))
                .try_get_matches_from(["test", "--log-format", "xml"]);
            assert!(result.is_err());
        });
    }
}
