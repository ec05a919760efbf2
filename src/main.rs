use app::App;
use stepsam::config::{Config, DEFAULT_CONFIG_PATH};
use tracing_subscriber::EnvFilter;

mod app;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&path)?;

    App::new(config).run()
}
