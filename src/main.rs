use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use pcap_bus::{ConvertEvent, Converter};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::config::{Args, Input};

mod api;
mod config;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("pcap_bus", log::LevelFilter::Info)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let code = match run(Args::parse()).await {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{:#}", e);
            1
        }
    };
    // a stdin reader may still be parked in a blocking read
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<()> {
    let converter = Converter::new(args.converter_config(), args.decoder());

    let cancel = CancellationToken::new();
    if let Some(addr) = args.metrics_addr {
        api::start_api_server(addr, converter.metrics(), cancel.clone());
    }

    let mut events = match args.input() {
        Input::Stdin => converter.convert_reader("<stdin>", std::io::stdin()),
        Input::Path(path) => converter
            .convert_path(&path)
            .await
            .with_context(|| format!("cannot convert {}", path.display()))?,
    };

    let mut out = BufWriter::new(tokio::io::stdout());
    let mut errors = 0usize;
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(ConvertEvent::Packet(line)) => {
                    out.write_all(line.as_bytes()).await?;
                    out.write_all(b"\n").await?;
                }
                Some(ConvertEvent::Error(e)) => {
                    errors += 1;
                    log::error!("{}", e);
                }
                Some(ConvertEvent::End) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::warn!("interrupted, stopping before the conversion finished");
                break;
            },
        }
    }
    out.flush().await?;
    cancel.cancel();

    log::info!(
        "conversion finished: {}",
        serde_json::to_string(&converter.metrics().snapshot())?
    );
    if errors > 0 {
        anyhow::bail!("conversion finished with {} error(s)", errors);
    }
    Ok(())
}
