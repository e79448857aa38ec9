use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

pub const AMXC_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nCommands:\n{subcommands}\n\nGlobal options:\n{options}\n";

pub const AMXC_BEFORE_HELP: &str = concat!(
    "amxc ",
    env!("CARGO_PKG_VERSION"),
    " – Pawn gamemode build service\n\n",
    "  compile          Extract a server archive, compile its gamemode, store <name>.amx.\n",
    "  download         Fetch a stored artifact by name.\n",
    "  config           Show the resolved paths and limits.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "amxc",
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = AMXC_BEFORE_HELP,
    help_template = AMXC_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct AmxcCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(
        about = "Compile the gamemode inside one or more .zip server archives.",
        override_usage = "amxc compile <ARCHIVE> [ARCHIVE ...] [--name NAME]"
    )]
    Compile(CompileArgs),
    #[command(
        about = "Fetch a compiled artifact from the output store.",
        override_usage = "amxc download <NAME> [--to PATH]"
    )]
    Download(DownloadArgs),
    #[command(about = "Print the configuration resolved from AMXC_* variables.")]
    Config,
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    #[arg(
        value_name = "ARCHIVE",
        required = true,
        value_parser = value_parser!(PathBuf),
        help = "Server archive(s) to compile"
    )]
    pub archives: Vec<PathBuf>,
    #[arg(
        long,
        value_name = "NAME",
        help = "Client-side file name for a single archive; decides the artifact name"
    )]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[arg(value_name = "NAME", help = "Artifact file name, e.g. proj.amx")]
    pub name: String,
    #[arg(
        long,
        value_name = "PATH",
        value_parser = value_parser!(PathBuf),
        help = "Copy the artifact here (file or existing directory)"
    )]
    pub to: Option<PathBuf>,
}
