use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    root_command()
        .subcommand(run_command())
        .subcommand(config_command())
}

fn root_command() -> Command {
    Command::new("termexec")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run shell commands with streamed output and reliable completion detection")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
}

fn run_command() -> Command {
    Command::new("run")
        .about("Run a command and stream its output")
        .arg(
            Arg::new("host")
                .long("host")
                .help("Run inside an interactive shell in a PTY instead of a detached subprocess")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cwd")
                .long("cwd")
                .help("Working directory (defaults to the current directory)")
                .value_name("DIR"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print JSONL status messages instead of raw lines")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("timeout-secs")
                .long("timeout-secs")
                .help("Abort the command after N seconds")
                .value_name("N")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("command")
                .help("Command line to run")
                .required(true)
                .num_args(1..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        )
}

fn config_command() -> Command {
    Command::new("config").about("Print the effective configuration as JSON")
}
