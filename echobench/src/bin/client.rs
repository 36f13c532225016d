//! `echo-client`: a load generator controlled by an `echo-controller`.

use clap::Parser;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::SubscriberInitExt;

use echobench::client;
use echobench::config::ClientArgs;
use echobench::signal::Shutdown;
use echobench::telemetry;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Telemetry(#[from] telemetry::Error),
    #[error(transparent)]
    Client(#[from] client::Error),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .finish()
        .init();

    let args = ClientArgs::parse();
    telemetry::install(args.telemetry_addr)?;

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown.clone().watch_ctrl_c());

    client::run(args.port, shutdown.watcher()).await?;
    Ok(())
}
