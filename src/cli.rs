use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chat playground for hosted LLMs
#[derive(Debug, Parser)]
#[command(name = "playground")]
#[command(version)]
#[command(about = "Chat with fast-LLM, inference-proxy and code-generation models", long_about = None)]
pub struct Args {
    /// Model identifier (default: config/model or "gemma2-9b-it")
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Where to write the image returned by the image-generation model
    #[arg(long = "save-image", value_name = "PATH")]
    pub save_image: Option<PathBuf>,

    /// Config file (default: <config dir>/config.toml)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,

    /// Print which provider and endpoint a model routes to
    Route {
        /// Model identifier
        model: String,
    },
}
