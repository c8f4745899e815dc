use crate::config;
use crate::provider::decode::DataUri;
use crate::provider::{Dispatcher, Router};
use crate::session::{Applied, MessageStatus, Session};
use crate::turn::TurnEvent;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub fn build_http() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

pub fn build_router(cfg: &config::Config) -> anyhow::Result<Router> {
    Router::new(&cfg.endpoints()).context("invalid endpoint configuration")
}

pub fn build_session(
    http: &reqwest::Client,
    cfg: &config::Config,
    model: String,
) -> anyhow::Result<(Session, mpsc::UnboundedReceiver<TurnEvent>)> {
    let router = build_router(cfg)?;
    let dispatcher = Dispatcher::new(http.clone(), cfg.timeout());
    Ok(Session::new(router, dispatcher, model))
}

pub fn cmd_route(cfg: &config::Config, model: &str) -> anyhow::Result<()> {
    let d = build_router(cfg)?.route(model);
    println!("{}\t{}\t{:?}", d.kind.name(), d.endpoint, d.format);
    Ok(())
}

/// Run a single turn, streaming text to stdout. Ctrl-C stops the turn.
pub async fn run_once(
    mut session: Session,
    mut events: mpsc::UnboundedReceiver<TurnEvent>,
    prompt: &str,
    save_image: Option<&Path>,
) -> anyhow::Result<()> {
    if session.submit(prompt).is_none() {
        anyhow::bail!("nothing to send");
    }

    let mut out = std::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while session.is_in_flight() {
        tokio::select! {
            res = &mut ctrl_c, if !interrupted => {
                res.context("failed to listen for ctrl-c")?;
                interrupted = true;
                session.stop();
            }
            ev = events.recv() => {
                let Some(ev) = ev else { break };
                if let Applied::Folded(text) = session.apply(ev) {
                    write!(out, "{text}")?;
                    out.flush().ok();
                }
            }
        }
    }

    let Some(reply) = session.messages().last() else {
        return Ok(());
    };

    match reply.status {
        MessageStatus::Complete => {
            if let Some(uri) = &reply.image {
                let path = write_image(uri, save_image)?;
                eprintln!("{} saved to {}", reply.content, path.display());
            } else {
                writeln!(out)?;
            }
            if let Some(m) = reply.metrics {
                eprintln!(
                    "{} tokens in {:.2}s ({:.2} tokens/s)",
                    m.total_tokens, m.time_taken, m.tokens_per_second
                );
            }
            Ok(())
        }
        MessageStatus::Stopped(reason) => {
            writeln!(out)?;
            eprintln!("[{reason}]");
            Ok(())
        }
        MessageStatus::Failed => anyhow::bail!("{}", reply.content),
        MessageStatus::Streaming => anyhow::bail!("turn ended without a result"),
    }
}

fn write_image(uri: &str, target: Option<&Path>) -> anyhow::Result<PathBuf> {
    let img = DataUri::parse(uri).context("image payload is not a usable data URI")?;
    let path = match target {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(format!("image.{}", img.extension().unwrap_or("bin"))),
    };
    std::fs::write(&path, &img.bytes)
        .with_context(|| format!("failed to write image: {}", path.display()))?;
    Ok(path)
}
