//! Replay recorded helper output through a managed proxy.

use std::path::Path;
use std::sync::Arc;

use console::style;
use tokio::io::{AsyncBufRead, BufReader};

use ptmanager::config::Config;
use ptmanager::transport::{extra_info_descriptor, CollectingSink, Phase, ProxyDriver, Role};

use crate::cli::helpers::{build_proxy, open_store};

pub async fn cmd_replay(
    config: &Config,
    role: Role,
    transports: &[String],
    state: Option<&Path>,
    label: &str,
    input: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let sink = Arc::new(CollectingSink::new());
    let store = open_store(state).await?;
    let driver = ProxyDriver::new(sink.clone(), store);

    let mut proxy = build_proxy(config, role, label, transports);

    let reader: Box<dyn AsyncBufRead + Unpin> = match input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let phase = driver.drive(reader, &mut proxy).await?;

    for event in sink.drain() {
        println!("{}", event);
    }

    let phase_str = match phase {
        Phase::Completed => style(phase.to_string()).green(),
        Phase::Broken => style(phase.to_string()).red(),
        _ => style(phase.to_string()).yellow(),
    };
    println!("{} {}", style("Phase:").bold(), phase_str);

    if role == Role::Server {
        if let Some(descriptor) = extra_info_descriptor([&proxy]) {
            print!("{}", descriptor);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&proxy.snapshot())?);
    }

    Ok(())
}
