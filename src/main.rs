use clap::Parser;
use dht_harvester::{app, config, logging};

#[tokio::main]
async fn main() {
  logging::init();

  let args = config::Args::parse();
  let settings = match config::Settings::load(&args) {
    Ok(settings) => settings,
    Err(error) => {
      eprintln!("failed to load configuration: {error}");
      std::process::exit(2);
    }
  };

  if let Err(error) = app::run(settings).await {
    log::error!("dht-harvester exited with an error: {error}");
    std::process::exit(1);
  }
}
