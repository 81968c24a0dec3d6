#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use eframe::egui;

use thermomark::app::ThermoMarkApp;
use thermomark::{log_info, logger};

fn main() -> Result<(), eframe::Error> {
    logger::init();
    log_info!("ThermoMark {} starting", env!("CARGO_PKG_VERSION"));

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("ThermoMark")
            .with_inner_size([1280.0, 840.0])
            .with_min_inner_size([900.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "ThermoMark",
        options,
        Box::new(|cc| Box::new(ThermoMarkApp::new(cc))),
    )
}
