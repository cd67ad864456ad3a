use crate::package::{NAME, VERSION};
use crate::signal::MAXSIG;

use clap::error::{ContextKind, ContextValue};
use clap::Parser;
use nix::sys::signal::Signal;
use std::process::exit;

/// The immutable configuration the rest of the program consumes.
#[derive(Debug)]
pub struct Config {
    pub command: Vec<String>,
    pub use_setsid: bool,
    pub debug: bool,
    pub rewrites: Vec<(Signal, Option<Signal>)>,
}

#[derive(Debug, Parser)]
#[command(
    name = "dumb-init",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Run in single-child mode: signals are proxied only to the direct
    /// child and not to any of its descendants.
    #[arg(short = 'c', long = "single-child")]
    single_child: bool,

    /// Rewrite received signal s to new signal r before proxying.
    /// Rewriting to 0 ignores the signal.
    #[arg(
        short = 'r',
        long = "rewrite",
        value_name = "s:r",
        allow_hyphen_values = true
    )]
    rewrite: Vec<String>,

    /// Print debugging information to stderr.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Print this help message and exit.
    #[arg(short = 'h', long = "help")]
    help: bool,

    /// Print the current version and exit.
    #[arg(short = 'V', long = "version")]
    version: bool,
}

impl Cli {
    pub fn parse() -> Config {
        let args: Vec<String> = std::env::args().collect();
        let (options, command) = split_command(&args);

        let cli = match Cli::try_parse_from(&options) {
            Ok(cli) => cli,
            Err(err) => {
                if is_rewrite_error(&err) {
                    print_rewrite_usage_and_exit();
                }
                let _ = err.print();
                exit(1);
            }
        };

        if cli.help {
            print_help_and_exit();
        }

        if cli.version {
            print_version_and_exit();
        }

        let mut rewrites = Vec::with_capacity(cli.rewrite.len());
        for value in &cli.rewrite {
            match parse_rewrite(value) {
                Some(rewrite) => rewrites.push(rewrite),
                None => print_rewrite_usage_and_exit(),
            }
        }

        if command.is_empty() {
            print_usage_and_exit();
        }

        Config {
            command,
            use_setsid: !cli.single_child && setsid_env(env_var("DUMB_INIT_SETSID").as_deref()),
            debug: cli.verbose || debug_env(env_var("DUMB_INIT_DEBUG").as_deref()),
            rewrites,
        }
    }
}

// Option parsing stops at the first non-option argument; everything from
// there on belongs to the command. clap only ever sees the option prefix.
fn split_command(args: &[String]) -> (Vec<String>, Vec<String>) {
    let mut index = 1;
    while index < args.len() {
        let arg = &args[index];
        if arg == "--" {
            return (args[..index].to_vec(), args[index + 1..].to_vec());
        }
        if !arg.starts_with('-') || arg == "-" {
            break;
        }
        if takes_value(arg) {
            index += 1;
        }
        index += 1;
    }
    (args[..index].to_vec(), args[index..].to_vec())
}

// The rewrite option takes a value; when the value is not attached
// (-r 15:2, -vr 15:2) the following token belongs to it, whatever it
// looks like.
fn takes_value(arg: &str) -> bool {
    if arg == "--rewrite" {
        return true;
    }
    if arg.starts_with("--") {
        return false;
    }
    let body = &arg[1..];
    match body.find('r') {
        Some(position) => position == body.len() - 1,
        None => false,
    }
}

fn is_rewrite_error(err: &clap::Error) -> bool {
    err.context().any(|(kind, value)| {
        kind == ContextKind::InvalidArg
            && matches!(value, ContextValue::String(s) if s.contains("--rewrite"))
    })
}

fn parse_rewrite(value: &str) -> Option<(Signal, Option<Signal>)> {
    let (from, to) = value.split_once(':')?;
    let from = Signal::try_from(parse_signum(from, 1)?).ok()?;
    let to = match parse_signum(to, 0)? {
        0 => None,
        to => Some(Signal::try_from(to).ok()?),
    };
    Some((from, to))
}

fn parse_signum(value: &str, min: i32) -> Option<i32> {
    let signum = value.parse::<i32>().ok()?;
    (min..=MAXSIG).contains(&signum).then_some(signum)
}

// DUMB_INIT_DEBUG: any non-empty value other than "0" turns on debugging.
fn debug_env(value: Option<&str>) -> bool {
    matches!(value, Some(v) if !v.is_empty() && v != "0")
}

// DUMB_INIT_SETSID: only an explicit "0" disables the new-session default.
fn setsid_env(value: Option<&str>) -> bool {
    !matches!(value, Some("0"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn print_usage_and_exit() -> ! {
    eprint!("Usage: {NAME} [option] program [args]\nTry {NAME} --help for full usage.\n");
    exit(1);
}

fn print_rewrite_usage_and_exit() -> ! {
    eprint!(
        "Usage: -r option takes <signum>:<signum>, where <signum> is between 1 and 31.\n\
         This option can be specified multiple times.\n\
         Use --help for full usage.\n"
    );
    exit(1);
}

fn print_version_and_exit() -> ! {
    eprint!("{NAME} v{VERSION}\n");
    exit(0);
}

const HELP_OPTIONS: &str = "\
Optional arguments:
   -c, --single-child   Run in single-child mode.
                        In this mode, signals are only proxied to the
                        direct child and not any of its descendants.
   -r, --rewrite s:r    Rewrite received signal s to new signal r before proxying.
                        To ignore (not proxy) a signal, rewrite it to 0.
                        This option can be specified multiple times.
   -v, --verbose        Print debugging information to stderr.
   -h, --help           Print this help message and exit.
   -V, --version        Print the current version and exit.

Full help is available online at https://github.com/Yelp/dumb-init
";

fn print_help_and_exit() -> ! {
    eprint!(
        "{NAME} v{VERSION}\n\
         Usage: {NAME} [option] command [[arg] ...]\n\
         \n\
         {NAME} is a simple process supervisor that forwards signals to children.\n\
         It is designed to run as PID1 in minimal container environments.\n\
         \n\
         {HELP_OPTIONS}"
    );
    exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn split_keeps_options_apart_from_command() {
        let (options, command) = split_command(&args(&["dumb-init", "-v", "echo", "-v", "hi"]));
        assert_eq!(options, args(&["dumb-init", "-v"]));
        assert_eq!(command, args(&["echo", "-v", "hi"]));
    }

    #[test]
    fn split_consumes_rewrite_values() {
        let (options, command) = split_command(&args(&["dumb-init", "-r", "15:2", "sleep", "1"]));
        assert_eq!(options, args(&["dumb-init", "-r", "15:2"]));
        assert_eq!(command, args(&["sleep", "1"]));
    }

    #[test]
    fn split_honors_double_dash() {
        let (options, command) = split_command(&args(&["dumb-init", "-r", "15:2", "--", "-weird"]));
        assert_eq!(options, args(&["dumb-init", "-r", "15:2"]));
        assert_eq!(command, args(&["-weird"]));
    }

    #[test]
    fn split_consumes_value_of_trailing_combined_short() {
        let (options, command) = split_command(&args(&["dumb-init", "-vr", "15:2", "true"]));
        assert_eq!(options, args(&["dumb-init", "-vr", "15:2"]));
        assert_eq!(command, args(&["true"]));
    }

    #[test]
    fn split_leaves_attached_rewrite_value_alone() {
        let (options, command) = split_command(&args(&["dumb-init", "-r15:2", "true"]));
        assert_eq!(options, args(&["dumb-init", "-r15:2"]));
        assert_eq!(command, args(&["true"]));
    }

    #[test]
    fn split_treats_bare_dash_as_command() {
        let (options, command) = split_command(&args(&["dumb-init", "-"]));
        assert_eq!(options, args(&["dumb-init"]));
        assert_eq!(command, args(&["-"]));
    }

    #[test]
    fn flags_parse_in_both_forms() {
        for variant in [["-c", "-v"], ["--single-child", "--verbose"]] {
            let cli = Cli::try_parse_from(["dumb-init"].into_iter().chain(variant)).unwrap();
            assert!(cli.single_child);
            assert!(cli.verbose);
        }
    }

    #[test]
    fn rewrites_accumulate() {
        let cli = Cli::try_parse_from(["dumb-init", "-r", "15:2", "--rewrite", "1:0"]).unwrap();
        assert_eq!(cli.rewrite, args(&["15:2", "1:0"]));
    }

    #[test]
    fn rewrite_values_may_start_with_a_dash() {
        let cli = Cli::try_parse_from(["dumb-init", "-r", "-5:1"]).unwrap();
        assert_eq!(cli.rewrite, args(&["-5:1"]));
    }

    #[test]
    fn missing_rewrite_value_is_a_rewrite_error() {
        let err = Cli::try_parse_from(["dumb-init", "-r"]).unwrap_err();
        assert!(is_rewrite_error(&err));
    }

    #[test]
    fn unknown_option_is_not_a_rewrite_error() {
        let err = Cli::try_parse_from(["dumb-init", "--yolo"]).unwrap_err();
        assert!(!is_rewrite_error(&err));
    }

    #[test]
    fn valid_rewrites_parse() {
        assert_eq!(
            parse_rewrite("15:2"),
            Some((Signal::SIGTERM, Some(Signal::SIGINT)))
        );
        assert_eq!(
            parse_rewrite("1:31"),
            Some((Signal::SIGHUP, Some(Signal::SIGSYS)))
        );
        assert_eq!(
            parse_rewrite("31:1"),
            Some((Signal::SIGSYS, Some(Signal::SIGHUP)))
        );
        assert_eq!(parse_rewrite("2:0"), Some((Signal::SIGINT, None)));
    }

    #[test]
    fn malformed_rewrites_are_rejected() {
        for value in ["", "herp", "herp:derp", "15", "15:", "15::12", "15:derp", ":2"] {
            assert_eq!(parse_rewrite(value), None, "{value:?}");
        }
    }

    #[test]
    fn out_of_range_rewrites_are_rejected() {
        for value in ["0:5", "32:5", "1:32", "-1:5", "15:-1", "-5:1"] {
            assert_eq!(parse_rewrite(value), None, "{value:?}");
        }
    }

    #[test]
    fn debug_env_requires_a_nonzero_value() {
        assert!(!debug_env(None));
        assert!(!debug_env(Some("")));
        assert!(!debug_env(Some("0")));
        assert!(debug_env(Some("1")));
        assert!(debug_env(Some("true")));
    }

    #[test]
    fn setsid_env_only_zero_disables() {
        assert!(setsid_env(None));
        assert!(setsid_env(Some("")));
        assert!(setsid_env(Some("1")));
        assert!(!setsid_env(Some("0")));
    }
}
