use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, ArgMatches};

use crate::commands::{self, command_summary, Command, CommandDescriptor, COMMANDS};
use crate::handlers::{self, Invocation};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_USAGE: u8 = 1;
pub const EXIT_FAILURE: u8 = 2;

pub const APPLICATION_NAME: &str = "Qt Resources Tool";
pub const BINARY_NAME: &str = "qtresources";

pub fn version_line() -> String {
    format!("{APPLICATION_NAME} {}", env!("CARGO_PKG_VERSION"))
}

fn flag(id: &'static str) -> Arg {
    Arg::new(id).action(ArgAction::SetTrue)
}

/// Positional slots after the command name.
fn operand_ids(command: Command) -> &'static [&'static str] {
    match command {
        Command::None => &[],
        Command::Verify | Command::List => &["file"],
        Command::Cat => &["file", "resource"],
    }
}

fn build_cli() -> clap::Command {
    let mut cli = clap::Command::new(BINARY_NAME)
        .about(format!("{APPLICATION_NAME}\n\n{}", command_summary()))
        .override_usage(format!("{BINARY_NAME} [options] <command>"))
        .disable_help_flag(true)
        .disable_version_flag(true)
        .disable_help_subcommand(true)
        .allow_external_subcommands(true)
        .arg(
            flag("help")
                .short('h')
                .long("help")
                .global(true)
                .help("Displays help on commandline options."),
        )
        .arg(
            flag("version")
                .short('v')
                .long("version")
                .global(true)
                .help("Displays version information."),
        );
    for descriptor in &COMMANDS {
        cli = cli.subcommand(command_cli(descriptor));
    }
    cli
}

fn command_cli(descriptor: &CommandDescriptor) -> clap::Command {
    let mut cli = clap::Command::new(descriptor.name)
        .about(descriptor.description)
        .hide(true)
        .disable_help_flag(true)
        .disable_version_flag(true);

    if descriptor.command == Command::List {
        cli = cli
            .arg(flag("all").short('a').help("Also show Qt private content."))
            .arg(flag("long").short('l').help("Use a long listing format."));
    }

    for &id in operand_ids(descriptor.command) {
        let arg = match id {
            "file" => Arg::new(id)
                .value_name("file")
                .value_parser(value_parser!(OsString))
                .help("The file name of the Qt resource file or library."),
            _ => Arg::new(id)
                .value_name(id)
                .help("The Qt resource file to dump."),
        };
        cli = cli.arg(arg);
    }

    // Extra operands are collected rather than rejected so that the arity
    // check can answer with help text.
    cli.arg(
        Arg::new("surplus")
            .num_args(1..)
            .hide(true)
            .value_parser(value_parser!(OsString)),
    )
}

fn write_help(cli: &mut clap::Command, out: &mut dyn Write) -> io::Result<()> {
    write!(out, "{}", cli.render_help())?;
    out.flush()
}

/// Exit code for an informational write: `code` when it reached `out`.
fn written(result: io::Result<()>, code: u8) -> u8 {
    match result {
        Ok(()) => code,
        Err(error) => {
            tracing::debug!(%error, "cannot write to standard output");
            EXIT_FAILURE
        }
    }
}

/// Counts positional tokens the way the arity table does: the command name
/// plus every operand given.
fn positional_count(command: Command, matches: &ArgMatches) -> usize {
    let operands = operand_ids(command)
        .iter()
        .filter(|id| matches.contains_id(id))
        .count();
    let surplus = matches
        .get_many::<OsString>("surplus")
        .map_or(0, |values| values.len());
    1 + operands + surplus
}

fn invocation(command: Command, matches: &ArgMatches) -> Invocation {
    let is_list = command == Command::List;
    Invocation {
        command,
        show_private: is_list && matches.get_flag("all"),
        long_format: is_list && matches.get_flag("long"),
        container: matches
            .get_one::<OsString>("file")
            .map(PathBuf::from)
            .unwrap_or_default(),
        resource: if command == Command::Cat {
            matches.get_one::<String>("resource").cloned()
        } else {
            None
        },
    }
}

/// Runs one invocation of the tool and returns its exit code.
///
/// `args` includes the program name. Help, version and listings go to
/// `out`, diagnostics to `err`.
pub fn dispatch<I, T>(args: I, out: &mut dyn Write, err: &mut dyn Write) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut cli = build_cli();
    let matches = match cli.try_get_matches_from_mut(args) {
        Ok(matches) => matches,
        Err(error) => {
            let _ = write!(err, "{}", error.render());
            return EXIT_USAGE;
        }
    };
    cli.build();

    let help = matches.get_flag("help");
    let version = matches.get_flag("version");

    let selected = matches.subcommand().and_then(|(name, sub_matches)| {
        commands::lookup(name).map(|descriptor| (descriptor, sub_matches))
    });

    let Some((descriptor, sub_matches)) = selected else {
        // Without a command the tool always ends in help and a usage error,
        // whichever informational flags were given.
        tracing::debug!(help, version, "no command selected");
        if version {
            let _ = writeln!(out, "{}", version_line());
        }
        let _ = write_help(&mut cli, out);
        return EXIT_USAGE;
    };

    let command = descriptor.command;
    let Some(command_cli) = cli.find_subcommand_mut(descriptor.name) else {
        return EXIT_USAGE;
    };

    if version || sub_matches.get_flag("version") {
        return written(writeln!(out, "{}", version_line()), EXIT_SUCCESS);
    }
    if help || sub_matches.get_flag("help") {
        return written(write_help(command_cli, out), EXIT_SUCCESS);
    }

    let given = positional_count(command, sub_matches);
    if given != command.arity() {
        tracing::debug!(
            command = descriptor.name,
            given,
            expected = command.arity(),
            "wrong number of operands"
        );
        let _ = write_help(command_cli, out);
        return EXIT_USAGE;
    }

    let invocation = invocation(command, sub_matches);
    let Some(handler) = handlers::handler(command) else {
        return EXIT_USAGE;
    };
    tracing::debug!(?invocation, "dispatching");

    match handler(&invocation, out) {
        Ok(()) => EXIT_SUCCESS,
        Err(error) => {
            let _ = writeln!(err, "{error}");
            EXIT_FAILURE
        }
    }
}
