use feature_tiler::{Settings, logging, run};

fn main() -> anyhow::Result<()> {
    logging::setup_logging();
    let settings = Settings::from_cli();
    let summary = run(&settings)?;
    tracing::info!("{summary}");
    Ok(())
}
