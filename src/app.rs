mod image_loader;
mod ui;

use std::time::Instant;

use stepsam::{Config, SamPipeline};
use tracing::info;

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        App { config }
    }

    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let timer = Instant::now();
        let pipeline = SamPipeline::from_config(&self.config)?;
        info!(elapsed = ?timer.elapsed(), "models loaded");

        ui::UiData::new(pipeline).run()
    }
}
