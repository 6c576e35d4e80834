use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use wplacer_engine::Template;
use wplacer_server::config::Config;

#[derive(Debug, Parser)]
#[command(name = "wplacer-server", about = "Local auto-fill companion for wplace.live")]
struct Args {
    /// Config file (default: ~/.wplacer/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Template image (PNG) to fill.
    #[arg(long)]
    template: Option<PathBuf>,
    /// Global canvas position of the template's top-left pixel.
    #[arg(long, value_parser = parse_position, requires = "template")]
    at: Option<(i64, i64)>,
    /// Start filling immediately.
    #[arg(long)]
    autostart: bool,
}

fn parse_position(raw: &str) -> Result<(i64, i64), String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {raw:?}"))?;
    let x = x.trim().parse::<i64>().map_err(|e| format!("bad X {x:?}: {e}"))?;
    let y = y.trim().parse::<i64>().map_err(|e| format!("bad Y {y:?}: {e}"))?;
    Ok((x, y))
}

fn load_template(path: &Path, (x, y): (i64, i64)) -> anyhow::Result<Template> {
    let img = image::open(path)
        .with_context(|| format!("open template: {}", path.display()))?
        .to_rgba8();
    let template = Template::from_image(&img, x, y)?;
    log::info!(
        "template {} at {x},{y}: {} pixels over {} chunks",
        path.display(),
        template.pixel_count(),
        template.referenced_chunks().len()
    );
    Ok(template)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let template = match &args.template {
        Some(path) => Some(load_template(path, args.at.unwrap_or((0, 0)))?),
        None => None,
    };

    wplacer_server::serve(config, template, args.autostart).await
}
