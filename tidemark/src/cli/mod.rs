//! The `tidemark` command line.
//!
//! Applications that declare migrations with `#[migration]` ship their own
//! binary, since registration happens at link time:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() {
//!     tidemark::cli::run().await;
//! }
//! ```

mod commands;
mod examples;
mod output;
mod project;
mod theme;

use anyhow::Result;
use clap::{
    ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand,
    builder::{
        Styles,
        styling::{AnsiColor, Style},
    },
};
use colored::{Color as ThemeColor, Colorize, control::ShouldColorize};
use std::fmt::Write;

use commands::{
    init::{InitArgs, handle_init},
    migrate::{MigrateCommands, handle_migrate_commands},
};
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("REDIS_URL", "Redis connection URL used by the default config"),
    ("RUST_LOG", "Log filter, e.g. tidemark=debug for run progress"),
];

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(version)]
#[command(
    about = "Ordered, resumable data migrations",
    long_about = r#"Runs numbered data migrations against a key-value store:

• Migrations are async functions registered with #[tidemark::migration]
• A persisted watermark records the highest applied migration
• Re-running only applies what is above the watermark

Commands:
  init      Initialize tidemark in a project
  migrate   Deploy and inspect migrations
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable verbose output and debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse with themed help and per-command example appendices.
    fn parse_with_styles() -> Self {
        let matches = build_cli_command().get_matches();
        Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit())
    }
}

fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .styles(help_styles())
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never })
        .after_long_help(render_appendix(use_color));

    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand
                .clone()
                .after_long_help(render_examples(example.groups, use_color));
        }
    }
    command
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", stylize("Examples:", THEME.highlight, true, use_color));

    for (index, group) in groups.iter().enumerate() {
        if index > 0 {
            buffer.push('\n');
        }
        let _ = writeln!(buffer, "  {}", stylize(group.title, THEME.primary, true, use_color));
        for command in group.commands {
            let line = format!("{} {command}", ICONS.arrow);
            let _ = writeln!(buffer, "    {}", stylize(&line, THEME.secondary, false, use_color));
        }
    }
    buffer
}

fn render_appendix(use_color: bool) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", stylize("Environment Variables:", THEME.highlight, true, use_color));
    for (key, description) in ENVIRONMENT_VARIABLES {
        let _ = writeln!(
            buffer,
            "  {}  {}",
            stylize(key, THEME.key, true, use_color),
            stylize(description, THEME.value, false, use_color)
        );
    }
    let _ = writeln!(
        buffer,
        "\n{} Run 'tidemark migrate --help' for deploy and inspection examples.",
        stylize("Tip:", THEME.highlight, true, use_color)
    );
    buffer
}

fn stylize(text: &str, color: ThemeColor, bold: bool, use_color: bool) -> String {
    match (use_color, bold) {
        (false, _) => text.to_string(),
        (true, true) => text.color(color).bold().to_string(),
        (true, false) => text.color(color).to_string(),
    }
}

/// Help colors, kept in step with [`THEME`].
fn help_styles() -> Styles {
    let ansi = |color: AnsiColor| Style::new().fg_color(Some(color.into()));
    Styles::styled()
        .usage(ansi(AnsiColor::BrightBlue).bold())
        .header(ansi(AnsiColor::Cyan).bold())
        .literal(ansi(AnsiColor::Magenta))
        .placeholder(ansi(AnsiColor::BrightBlack))
        .valid(ansi(AnsiColor::Green))
        .invalid(ansi(AnsiColor::Yellow))
        .error(ansi(AnsiColor::Red).bold())
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize tidemark in the current project
    Init(InitArgs),

    /// Deploy and inspect migrations
    #[command(subcommand)]
    Migrate(MigrateCommands),
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "tidemark=debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).try_init();
}

/// Parse the command line, run the command, and exit with status 1 on error.
pub async fn run() {
    let cli = Cli::parse_with_styles();
    init_logging(cli.verbose);

    if let Err(err) = execute(cli).await {
        eprintln!("{} {err:#}", "Error:".color(THEME.error).bold());
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let global_options = GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    };
    if global_options.no_color {
        colored::control::set_override(false);
    }

    let output = OutputManager::new(global_options);

    match cli.command {
        Commands::Init(args) => {
            handle_init(args, &output).await?;
        }
        Commands::Migrate(migrate_cmd) => {
            handle_migrate_commands(migrate_cmd, &output).await?;
        }
    }

    Ok(())
}
