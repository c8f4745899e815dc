mod aggregate;
mod app;
mod cli;
mod config;
mod error;
mod provider;
mod session;
mod turn;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use provider::router::DEFAULT_MODEL;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let cfg = match args.config.clone().or_else(config::default_path) {
        Some(path) => config::Config::load(&path)?,
        None => {
            tracing::warn!("no config directory found; using defaults");
            config::Config::default()
        }
    };
    tracing::debug!(?cfg, "resolved config");

    let model = args
        .model
        .clone()
        .or_else(|| cfg.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    match args.cmd {
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            return tui::run_tui(&cfg, model).await;
        }
        Some(cli::Command::Route { model }) => {
            return app::cmd_route(&cfg, &model);
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: playground \"Hello\" or `playground tui` (feature flag)");
    }

    let http = app::build_http()?;
    let (session, events) = app::build_session(&http, &cfg, model)?;

    app::run_once(session, events, &prompt, args.save_image.as_deref())
        .await
        .context("turn failed")
}
