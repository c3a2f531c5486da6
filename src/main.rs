mod ui;

use eframe::egui;
use gw2_analyzer::config::{AppConfig, CONFIG_FILE};
use ui::Gw2App;

fn main() -> eframe::Result<()> {
    dotenv::dotenv().ok();
    gw2_analyzer::init_logging();

    let config = AppConfig::load(CONFIG_FILE);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1600.0, 1000.0])
            .with_min_inner_size([1200.0, 700.0]),
        ..Default::default()
    };

    eframe::run_native(
        "GW2 Trading Post Analyzer",
        options,
        Box::new(|cc| {
            let mut fonts = egui::FontDefinitions::default();

            if let Ok(segoe_data) = std::fs::read("C:\\Windows\\Fonts\\segoeui.ttf") {
                fonts.font_data.insert(
                    "SegoeUI".to_owned(),
                    egui::FontData::from_owned(segoe_data).into(),
                );
                if let Some(family) = fonts.families.get_mut(&egui::FontFamily::Proportional) {
                    family.insert(0, "SegoeUI".to_owned());
                }
            }

            cc.egui_ctx.set_fonts(fonts);
            ui::set_custom_style(&cc.egui_ctx);
            Ok(Box::new(Gw2App::new(config)))
        }),
    )
}
