//! `echo-controller`: discovers clients, drives them through volleys, and
//! records results.

use clap::Parser;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::SubscriberInitExt;

use echobench::config::ControllerArgs;
use echobench::controller;
use echobench::telemetry;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Telemetry(#[from] telemetry::Error),
    #[error(transparent)]
    Controller(#[from] controller::Error),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .finish()
        .init();

    let args = ControllerArgs::parse();
    telemetry::install(args.telemetry_addr)?;

    controller::run(args).await?;
    Ok(())
}
