mod app;
mod backfill;
mod domain;
mod fetch;
mod github;
mod pipeline;
mod report;
mod storage;

use app::{APP_NAME, StandupApp};
use eframe::NativeOptions;

fn main() -> eframe::Result<()> {
    env_logger::init();
    let options = NativeOptions::default();
    eframe::run_native(
        APP_NAME,
        options,
        Box::new(|cc| Ok(Box::new(StandupApp::new(cc)))),
    )
}
