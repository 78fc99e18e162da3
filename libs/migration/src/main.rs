use core_config::env_required;
use core_config::tracing::install_color_eyre;
use migration::Migrator;
use sea_orm_migration::cli;

/// `DATABASE_URL` selects the target; run with `--help` for commands.
#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();
    env_required("DATABASE_URL")?;

    cli::run_cli(Migrator).await;
    Ok(())
}
