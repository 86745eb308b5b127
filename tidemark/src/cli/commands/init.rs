use anyhow::Result;
use clap::Args;

use crate::cli::examples::ExampleGroup;
use crate::cli::output::OutputManager;
use crate::cli::project::ProjectContext;
use crate::config::TidemarkConfig;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Setup",
    commands: &[
        "tidemark init                        # Write .tidemark/config.toml with defaults",
        "tidemark init --force                # Overwrite an existing config",
    ],
}];

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing .tidemark/config.toml
    #[arg(long)]
    force: bool,
}

pub async fn handle_init(args: InitArgs, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;
    init_project(&ctx, args.force, output)
}

fn init_project(ctx: &ProjectContext, force: bool, output: &OutputManager) -> Result<()> {
    output.heading("Initialize tidemark");

    if ctx.is_initialized() && !force {
        output.warning(&format!("{} already exists", ctx.config_path.display()));
        output.info("Use --force to overwrite it with the defaults.");
        return Ok(());
    }

    ctx.write_config(&TidemarkConfig::default())?;
    output.success(&format!("Created {}", ctx.config_path.display()));

    output.info("Next steps:");
    output.bullet("Set REDIS_URL or edit [store] url");
    output.bullet("Annotate migration functions with #[tidemark::migration(sequence = N)]");
    output.bullet("Run 'tidemark migrate deploy' to apply");

    Ok(())
}
