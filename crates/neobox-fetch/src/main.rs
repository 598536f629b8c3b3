//! Neobox Fetch - Main Entry Point
//!
//! Downloads one URL to a file. A failed or non-2xx download leaves no file
//! behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use neobox_http::{Callbacks, HttpContext, HttpSession, HttpUrl, Response, Settings};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: neobox-fetch [--async] [--check-online] [--settings FILE] [--redirects N] URL OUTPUT";

#[derive(Debug, Default, PartialEq)]
struct Args {
    url: String,
    output: PathBuf,
    settings: Option<PathBuf>,
    redirects: Option<u32>,
    async_mode: bool,
    check_online: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--async" => parsed.async_mode = true,
            "--check-online" => parsed.check_online = true,
            "--settings" => {
                parsed.settings = Some(args.next().context("--settings needs a file")?.into());
            }
            "--redirects" => {
                let value = args.next().context("--redirects needs a number")?;
                parsed.redirects = Some(value.parse().with_context(|| format!("invalid redirect count {:?}", value))?);
            }
            flag if flag.starts_with("--") => bail!("unknown option {}\n{}", flag, USAGE),
            _ => positional.push(arg),
        }
    }

    let [url, output] = <[String; 2]>::try_from(positional).map_err(|_| anyhow::anyhow!(USAGE))?;
    parsed.url = url;
    parsed.output = output.into();
    Ok(parsed)
}

fn load_context(args: &Args) -> Result<HttpContext> {
    let mut context = match &args.settings {
        Some(path) => {
            let settings = Settings::load(path)
                .with_context(|| format!("reading settings {}", path.display()))?;
            HttpContext::from_settings(&settings)?
        }
        None => HttpContext::default(),
    };

    if let Some(redirects) = args.redirects {
        context.max_redirects = redirects;
    }
    context.check_online |= args.check_online;
    Ok(context)
}

fn download_async(session: &mut HttpSession, output: &Path) -> Result<Arc<Response>> {
    let mut last_percent = None;
    let callbacks = Callbacks::new()
        .on_progress(move |received, total| match total {
            Some(total) if total > 0 => {
                let percent = received * 100 / total;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    tracing::info!("{}% ({}/{} bytes)", percent, received, total);
                }
            }
            _ => tracing::debug!("{} bytes", received),
        })
        .on_finish(|message, response| {
            if !message.is_empty() {
                tracing::warn!("Download failed: {}", message);
            } else {
                tracing::debug!("Download finished with {}", response.status);
            }
        });

    let response = smol::block_on(session.get_async(callbacks)).context("request was abandoned")?;

    if response.is_success() {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(output, &response.body)
            .with_context(|| format!("writing {}", output.display()))?;
    }

    Ok(response)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let context = load_context(&args)?;

    let url = HttpUrl::parse(&args.url)?;
    tracing::info!("Fetching {} -> {}", url, args.output.display());

    let mut session = HttpSession::with_context(url, &context);
    let response = if args.async_mode {
        download_async(&mut session, &args.output)?
    } else {
        session.get_to_file(&args.output)
    };

    if !response.is_success() {
        if args.output.exists() {
            fs::remove_file(&args.output)
                .with_context(|| format!("removing partial {}", args.output.display()))?;
        }

        match session.last_error() {
            Some(err) => return Err(err).context(format!("fetching {}", args.url)),
            None => bail!("{} answered {} {}", session.effective_url(), response.status, response.reason),
        }
    }

    tracing::info!("Saved {} bytes to {}", session.progress().0, args.output.display());
    Ok(())
}
