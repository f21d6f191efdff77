use clap::Parser;
use log::info;
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use stagehand_server::config::Settings;
use stagehand_server::obs::ObsClient;
use stagehand_server::transcoder::Ffmpeg;
use stagehand_server::web::Web;
use stagehand_server::{Cli, Engine, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .format_timestamp_millis()
        .init();

    info!("Stagehand server {} starting", VERSION);

    let settings = Settings::from_cli(&args).into_diagnostic()?;
    let file_watch_interval = settings.file_watch_interval;

    let obs = ObsClient::new(&settings);
    let transcoder = Arc::new(Ffmpeg::new(&settings.ffmpeg, &settings.ffprobe));
    let engine = Engine::new(settings, Arc::new(obs.clone()), transcoder);
    let web = Web::new(engine.clone());

    Toplevel::new(move |s| async move {
        let outputs = engine.outputs.clone();
        s.start(SubsystemBuilder::new("OBS", |a| obs.run(a)));
        s.start(SubsystemBuilder::new("DeviceEvents", |a| engine.run_device_events(a)));
        s.start(SubsystemBuilder::new("FileOutputWatcher", move |a| {
            outputs.run(a, file_watch_interval)
        }));
        s.start(SubsystemBuilder::new("Webserver", |a| web.run(a)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}
