use eframe::egui;
use egui::{Color32, Context, FontFamily, FontId, Margin, RichText, Stroke, Vec2, Visuals};
use egui_extras::{Column, TableBuilder};
use egui_plot::{Bar, BarChart, Legend, Line, Plot, PlotPoints};
use std::path::Path;
use tracing::{error, warn};

use gw2_analyzer::config::{AppConfig, CONFIG_FILE};
use gw2_analyzer::jobs::{self, FlipScan, Job, ProfitScan};
use gw2_analyzer::model::TrackedOrder;
use gw2_analyzer::report::FlipRow;
use gw2_analyzer::store::{Store, DB_FILE};

const GOLD: Color32 = Color32::from_rgb(255, 210, 100);
const HEADER: Color32 = Color32::from_rgb(200, 180, 140);
const GOOD: Color32 = Color32::from_rgb(120, 230, 120);
const BAD: Color32 = Color32::from_rgb(255, 110, 110);

const MAX_LOG_LINES: usize = 500;

pub fn set_custom_style(ctx: &Context) {
    // Trading post dark theme with gold accents
    let mut visuals = Visuals::dark();

    visuals.panel_fill = Color32::from_rgb(18, 16, 14);
    visuals.window_fill = Color32::from_rgb(26, 23, 20);
    visuals.extreme_bg_color = Color32::from_rgb(38, 33, 27);
    visuals.faint_bg_color = Color32::from_rgb(32, 28, 23);

    visuals.widgets.inactive.bg_fill = Color32::from_rgb(45, 40, 32);
    visuals.widgets.inactive.bg_stroke = Stroke::new(1.0, Color32::from_rgb(85, 70, 45));

    visuals.widgets.hovered.bg_fill = Color32::from_rgb(68, 58, 40);
    visuals.widgets.hovered.bg_stroke = Stroke::new(2.0, Color32::from_rgb(210, 170, 80));

    visuals.widgets.active.bg_fill = Color32::from_rgb(88, 74, 48);
    visuals.widgets.active.bg_stroke = Stroke::new(2.0, GOLD);

    visuals.selection.bg_fill = Color32::from_rgb(100, 82, 50);
    visuals.selection.stroke = Stroke::new(1.0, GOLD);

    ctx.set_visuals(visuals);

    let mut style = (*ctx.style()).clone();

    style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    style.spacing.window_margin = Margin::same(12);
    style.spacing.button_padding = egui::vec2(12.0, 6.0);
    style.spacing.indent = 16.0;

    style.text_styles.insert(egui::TextStyle::Body, FontId::new(15.0, FontFamily::Proportional));
    style.text_styles.insert(egui::TextStyle::Heading, FontId::new(20.0, FontFamily::Proportional));
    style.text_styles.insert(egui::TextStyle::Button, FontId::new(15.0, FontFamily::Proportional));
    style.text_styles.insert(egui::TextStyle::Monospace, FontId::new(13.0, FontFamily::Monospace));

    ctx.set_style(style);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tab {
    Flips,
    Profit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SortBy {
    UnitProfit,
    ExpectedProfit,
    ExpectedRoi,
    FlipRate,
    TargetReturn,
    Name,
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
struct Filters {
    search: String,
    min_unit_profit: f64,
    min_flip_rate: f64,  // percent
    actionable_only: bool,
    tracked_only: bool,
    hide_no_market: bool,
}

impl Default for Filters {
    fn default() -> Self {
        Filters {
            search: String::new(),
            min_unit_profit: 0.0,
            min_flip_rate: 0.0,
            actionable_only: false,
            tracked_only: false,
            hide_no_market: true,
        }
    }
}

fn matches(row: &FlipRow, f: &Filters) -> bool {
    let o = &row.listing.observation;
    let m = &row.metrics;

    if f.hide_no_market && !row.is_tracked() && (o.buy_price <= 0.0 || o.sell_price <= 0.0) {
        return false;
    }
    if f.tracked_only && !row.is_tracked() {
        return false;
    }
    if f.actionable_only && !row.actionable() {
        return false;
    }
    if f.min_unit_profit > 0.0 && m.unit_profit < f.min_unit_profit {
        return false;
    }
    if f.min_flip_rate > 0.0 && m.flip_through_rate * 100.0 < f.min_flip_rate {
        return false;
    }
    if !f.search.is_empty() && !row.listing.name.to_lowercase().contains(&f.search.to_lowercase()) {
        return false;
    }
    true
}

fn sort_key(row: &FlipRow, by: SortBy) -> f64 {
    let m = &row.metrics;
    let o = &row.listing.observation;
    match by {
        SortBy::UnitProfit => m.unit_profit,
        SortBy::ExpectedProfit => m.expected_profit_at_optimal.unwrap_or(f64::NEG_INFINITY),
        SortBy::ExpectedRoi => m.expected_roi_at_optimal.unwrap_or(f64::NEG_INFINITY),
        SortBy::FlipRate => m.flip_through_rate,
        SortBy::TargetReturn => m.theoretical_return_for_target_roi.unwrap_or(f64::NEG_INFINITY),
        SortBy::Buy => o.buy_price,
        SortBy::Sell => o.sell_price,
        SortBy::Name => 0.0,
    }
}

/// Indices into `rows` that pass `filters`, sorted.
fn visible_rows(rows: &[FlipRow], filters: &Filters, by: SortBy, order: SortOrder) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..rows.len()).filter(|&i| matches(&rows[i], filters)).collect();

    idx.sort_by(|&a, &b| {
        let (ra, rb) = (&rows[a], &rows[b]);
        let ord = match by {
            SortBy::Name => ra.listing.name.to_lowercase().cmp(&rb.listing.name.to_lowercase()),
            _ => sort_key(ra, by).total_cmp(&sort_key(rb, by)),
        };
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
    idx
}

/// A new order sized by the engine: optimal quantity at the overcut price.
fn order_from_row(row: &FlipRow) -> TrackedOrder {
    TrackedOrder {
        item_id: row.listing.observation.item_id.clone(),
        qty_ordered: row.metrics.optimal_quantity.unwrap_or(0).max(1),
        buy_price: row.metrics.overcut_price,
        sell_price: Some(row.metrics.undercut_price),
        buy_placed: true,
        sell_placed: false,
        sold: false,
    }
}

/// Flips the tracked state of `row` in the store. The row only changes once the store agrees.
fn toggle_order(store: &Store, row: &mut FlipRow) -> rusqlite::Result<String> {
    match &row.order {
        Some(order) => {
            store.remove_order(&order.item_id)?;
            row.order = None;
            Ok(format!("Stopped tracking {}.", row.listing.name))
        }
        None => {
            let order = order_from_row(row);
            store.upsert_order(&order)?;
            let msg = format!("Tracking {} x{} at {}.", row.listing.name, order.qty_ordered, format_gold(order.buy_price));
            row.order = Some(order);
            Ok(msg)
        }
    }
}

pub struct Gw2App {
    config: AppConfig,
    output_dir_text: String,
    tab: Tab,

    flip_job: Option<Job<FlipScan>>,
    profit_job: Option<Job<ProfitScan>>,
    log: Vec<String>,

    scan: FlipScan,
    visible: Vec<usize>,
    filters: Filters,
    sort_by: SortBy,
    sort_order: SortOrder,

    selected: Option<usize>,
    selected_history: Vec<(String, f64, f64)>,

    profit: Option<ProfitScan>,
}

impl Gw2App {
    pub fn new(config: AppConfig) -> Self {
        let mut app = Self {
            output_dir_text: config.output_dir.display().to_string(),
            config,
            tab: Tab::Flips,

            flip_job: None,
            profit_job: None,
            log: vec![],

            scan: FlipScan::default(),
            visible: vec![],
            filters: Filters::default(),
            sort_by: SortBy::UnitProfit,
            sort_order: SortOrder::Descending,

            selected: None,
            selected_history: vec![],

            profit: None,
        };
        if app.config.output_dir.join(DB_FILE).exists() {
            app.reload_saved_scan();
        }
        app
    }

    fn busy(&self) -> bool {
        self.flip_job.is_some() || self.profit_job.is_some()
    }

    fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
        if self.log.len() > MAX_LOG_LINES {
            let excess = self.log.len() - MAX_LOG_LINES;
            self.log.drain(..excess);
        }
    }

    fn save_config(&mut self) {
        if let Err(e) = self.config.save(CONFIG_FILE) {
            warn!(error = %e, "Could not save config");
            self.push_log(format!("Could not save config: {e:#}"));
        }
    }

    fn apply_filters(&mut self) {
        self.visible = visible_rows(&self.scan.rows, &self.filters, self.sort_by, self.sort_order);
    }

    fn set_scan(&mut self, scan: FlipScan) {
        self.scan = scan;
        self.selected = None;
        self.selected_history.clear();
        self.apply_filters();
    }

    fn reload_saved_scan(&mut self) {
        match jobs::load_saved_scan(&self.config) {
            Ok(scan) => {
                if !scan.rows.is_empty() {
                    self.push_log(format!("Loaded {} rows from scrape at {}.", scan.rows.len(), scan.scraped_at));
                }
                self.set_scan(scan);
            }
            Err(e) => self.push_log(format!("Could not load saved scrape: {e:#}")),
        }
    }

    fn start_flip_scan(&mut self) {
        self.save_config();
        let cfg = self.config.clone();
        match Job::spawn("flip-scan", move |status| jobs::run_flip_scan(&cfg, status)) {
            Ok(job) => {
                self.push_log("Starting scraper...");
                self.flip_job = Some(job);
            }
            Err(e) => self.push_log(format!("Error: {e:#}")),
        }
    }

    fn start_profit_report(&mut self) {
        if self.config.api_key.trim().is_empty() {
            self.push_log("Error: API Key is missing.");
            return;
        }
        self.save_config();
        let cfg = self.config.clone();
        match Job::spawn("profit-report", move |status| jobs::run_profit_report(&cfg, status)) {
            Ok(job) => {
                self.push_log("Starting transaction scraper...");
                self.profit_job = Some(job);
            }
            Err(e) => self.push_log(format!("Error: {e:#}")),
        }
    }

    fn poll_jobs(&mut self, ctx: &Context) {
        let flip_done = match &self.flip_job {
            Some(job) => {
                let done = job.is_finished();
                self.log.extend(job.drain_log());
                done
            }
            None => false,
        };
        if flip_done {
            if let Some(job) = self.flip_job.take() {
                match job.join() {
                    Ok(scan) => {
                        self.push_log(format!("Flip scan finished: {} rows.", scan.rows.len()));
                        self.set_scan(scan);
                    }
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "Flip scan failed");
                        self.push_log(format!("Error: {e:#}"));
                    }
                }
            }
        }

        let profit_done = match &self.profit_job {
            Some(job) => {
                let done = job.is_finished();
                self.log.extend(job.drain_log());
                done
            }
            None => false,
        };
        if profit_done {
            if let Some(job) = self.profit_job.take() {
                match job.join() {
                    Ok(scan) => {
                        if let Some(html) = &scan.html {
                            ctx.open_url(egui::OpenUrl::new_tab(file_url(html)));
                        }
                        self.tab = Tab::Profit;
                        self.profit = Some(scan);
                    }
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "Profit report failed");
                        self.push_log(format!("Error: {e:#}"));
                    }
                }
            }
        }

        if self.log.len() > MAX_LOG_LINES {
            let excess = self.log.len() - MAX_LOG_LINES;
            self.log.drain(..excess);
        }
    }

    fn select(&mut self, idx: usize) {
        if self.selected == Some(idx) {
            self.selected = None;
            self.selected_history.clear();
            return;
        }
        self.selected = Some(idx);
        self.selected_history.clear();

        let Some(row) = self.scan.rows.get(idx) else { return };
        let id = row.listing.observation.item_id.clone();
        let history = jobs::open_store(&self.config)
            .and_then(|store| Ok(store.load_item_history(&id, self.config.history_days.max(1))?));
        match history {
            Ok(h) => self.selected_history = h,
            Err(e) => self.push_log(format!("Could not load history for {id}: {e:#}")),
        }
    }

    fn toggle_track(&mut self, idx: usize) {
        let store = match jobs::open_store(&self.config) {
            Ok(s) => s,
            Err(e) => {
                self.push_log(format!("Error: {e:#}"));
                return;
            }
        };
        let Some(row) = self.scan.rows.get_mut(idx) else { return };
        let result = toggle_order(&store, row);

        match result {
            Ok(msg) => self.push_log(msg),
            Err(e) => self.push_log(format!("Error: {e}")),
        }
        self.apply_filters();
    }

    fn save_order(&mut self, idx: usize) {
        let Some(order) = self.scan.rows.get(idx).and_then(|r| r.order.clone()) else { return };
        let saved = jobs::open_store(&self.config)
            .and_then(|store| Ok(store.upsert_order(&order)?));
        match saved {
            Ok(()) => self.push_log(format!("Saved order for item {}.", order.item_id)),
            Err(e) => self.push_log(format!("Error: {e:#}")),
        }
    }

    fn top_bar(&mut self, ui: &mut egui::Ui) {
        ui.add_space(4.0);
        ui.horizontal(|ui| {
            ui.heading(RichText::new("Guild Wars 2 Trading Post Analyzer").color(GOLD).strong().size(22.0));
            ui.separator();
            ui.selectable_value(&mut self.tab, Tab::Flips, "Flips");
            ui.selectable_value(&mut self.tab, Tab::Profit, "Profit & Loss");
            if self.busy() {
                ui.separator();
                ui.spinner();
                ui.label(RichText::new("Working...").color(HEADER));
            }
        });
        ui.add_space(4.0);
        ui.separator();

        let busy = self.busy();
        match self.tab {
            Tab::Flips => {
                ui.horizontal(|ui| {
                    ui.checkbox(&mut self.config.historical, "Fetch historical data (slower)");
                    ui.label("Days:");
                    ui.add(egui::DragValue::new(&mut self.config.history_days).range(1..=90));
                    ui.label("Pages:");
                    ui.add(egui::DragValue::new(&mut self.config.max_pages).range(0..=500))
                        .on_hover_text("0 scrapes every page");
                    ui.checkbox(&mut self.config.use_history_counts, "Use history counts")
                        .on_hover_text("Feed the calculations from the history averages instead of the scraped row");
                    ui.separator();
                    let run = ui.add_enabled(
                        !busy,
                        egui::Button::new(RichText::new("Run Scraper").color(GOLD).strong())
                            .min_size(Vec2::new(110.0, 28.0)),
                    );
                    if run.clicked() {
                        self.start_flip_scan();
                    }
                });
            }
            Tab::Profit => {
                ui.horizontal(|ui| {
                    ui.label("API key:");
                    ui.add(
                        egui::TextEdit::singleline(&mut self.config.api_key)
                            .password(true)
                            .hint_text("Enter your API key here")
                            .desired_width(350.0),
                    );
                    ui.label("Days:");
                    ui.add(egui::DragValue::new(&mut self.config.transaction_days).range(1..=90));
                    ui.separator();
                    let run = ui.add_enabled(
                        !busy,
                        egui::Button::new(RichText::new("Run Profit Report").color(GOLD).strong())
                            .min_size(Vec2::new(140.0, 28.0)),
                    );
                    if run.clicked() {
                        self.start_profit_report();
                    }
                });
            }
        }

        ui.horizontal(|ui| {
            ui.label("Output folder:");
            ui.add(egui::TextEdit::singleline(&mut self.output_dir_text).desired_width(350.0));
            if ui.add_enabled(!busy, egui::Button::new("Apply")).clicked() {
                self.config.output_dir = self.output_dir_text.trim().into();
                self.save_config();
                self.push_log(format!("Output folder set to: {}", self.config.output_dir.display()));
                self.reload_saved_scan();
            }
        });
        ui.add_space(2.0);
    }

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading(RichText::new("Filters & Settings").color(GOLD));
        ui.separator();

        egui::ScrollArea::vertical().show(ui, |ui| {
            let mut changed = false;

            ui.label(RichText::new("Search").strong());
            changed |= ui
                .add(egui::TextEdit::singleline(&mut self.filters.search).hint_text("Item name..."))
                .changed();
            ui.add_space(8.0);

            ui.label(RichText::new("Min unit profit").strong());
            changed |= ui
                .add(egui::Slider::new(&mut self.filters.min_unit_profit, 0.0..=20.0).suffix(" g").step_by(0.05))
                .changed();

            ui.label(RichText::new("Min flip-through rate").strong());
            changed |= ui
                .add(egui::Slider::new(&mut self.filters.min_flip_rate, 0.0..=100.0).suffix("%").step_by(1.0))
                .changed();
            ui.add_space(8.0);

            changed |= ui.checkbox(&mut self.filters.actionable_only, "Actionable at target ROI only").changed();
            changed |= ui.checkbox(&mut self.filters.tracked_only, "Tracked orders only").changed();
            changed |= ui.checkbox(&mut self.filters.hide_no_market, "Hide items with no market").changed();

            ui.add_space(8.0);
            ui.separator();
            ui.label(RichText::new("Sort by").strong());
            egui::ComboBox::from_id_salt("sort_by")
                .selected_text(format!("{:?}", self.sort_by))
                .show_ui(ui, |ui| {
                    let sorts = [
                        SortBy::UnitProfit,
                        SortBy::ExpectedProfit,
                        SortBy::ExpectedRoi,
                        SortBy::FlipRate,
                        SortBy::TargetReturn,
                        SortBy::Name,
                        SortBy::Buy,
                        SortBy::Sell,
                    ];
                    for sort in sorts {
                        changed |= ui.selectable_value(&mut self.sort_by, sort, format!("{sort:?}")).clicked();
                    }
                });
            ui.horizontal(|ui| {
                changed |= ui.selectable_value(&mut self.sort_order, SortOrder::Descending, "Desc").clicked();
                changed |= ui.selectable_value(&mut self.sort_order, SortOrder::Ascending, "Asc").clicked();
            });

            ui.add_space(8.0);
            if ui.button(RichText::new("Reset filters").color(BAD)).clicked() {
                self.filters = Filters::default();
                self.sort_by = SortBy::UnitProfit;
                self.sort_order = SortOrder::Descending;
                changed = true;
            }

            ui.add_space(8.0);
            ui.separator();
            ui.label(RichText::new("Parameters").strong());
            let p = &mut self.config.parameters;
            let mut recompute = false;
            ui.horizontal(|ui| {
                ui.label("Overcut");
                recompute |= ui.add(egui::DragValue::new(&mut p.overcut_pct).range(1.0..=2.0).speed(0.005)).changed();
            });
            ui.horizontal(|ui| {
                ui.label("Undercut");
                recompute |= ui.add(egui::DragValue::new(&mut p.undercut_pct).range(0.5..=1.0).speed(0.005)).changed();
            });
            ui.horizontal(|ui| {
                ui.label("Target ROI");
                recompute |= ui.add(egui::DragValue::new(&mut p.target_roi).range(0.0..=2.0).speed(0.005)).changed();
            });
            if recompute && !self.busy() {
                self.reload_saved_scan();
            }

            if changed {
                self.apply_filters();
            }
        });
    }

    fn flips_view(&mut self, ui: &mut egui::Ui) {
        if self.scan.rows.is_empty() {
            ui.centered_and_justified(|ui| {
                ui.label(RichText::new("Run the scraper to analyze the trading post").size(20.0).color(HEADER));
            });
            return;
        }

        ui.horizontal(|ui| {
            ui.label(RichText::new(format!("Scraped {}", self.scan.scraped_at)).color(HEADER));
            ui.separator();
            ui.label(format!("{} of {} items shown", self.visible.len(), self.scan.rows.len()));
            if let Some(path) = &self.scan.report {
                ui.separator();
                ui.label(format!("Report: {}", path.display()));
            }
        });

        let mut toggled = None;
        let mut clicked = None;
        let rows = &self.scan.rows;
        let visible = &self.visible;
        let selected = self.selected;

        let table_height = if selected.is_some() { ui.available_height() * 0.55 } else { ui.available_height() };
        ui.allocate_ui(Vec2::new(ui.available_width(), table_height), |ui| {
            TableBuilder::new(ui)
                .striped(true)
                .vscroll(true)
                .cell_layout(egui::Layout::left_to_right(egui::Align::Center))
                .column(Column::exact(36.0))   // Track
                .column(Column::remainder().at_least(180.0).clip(true))
                .column(Column::exact(80.0))   // Buy
                .column(Column::exact(80.0))   // Sell
                .column(Column::exact(90.0))   // Unit profit
                .column(Column::exact(70.0))   // Flip %
                .column(Column::exact(70.0))   // Opt qty
                .column(Column::exact(100.0))  // E(profit)
                .column(Column::exact(80.0))   // E(ROI)
                .column(Column::exact(100.0))  // Target buy
                .column(Column::exact(80.0))   // Days to sell
                .column(Column::exact(36.0))   // Link
                .header(28.0, |mut header| {
                    for title in [
                        "★", "Item Name", "Buy", "Sell", "Unit Profit", "Flip %",
                        "Opt Qty", "E(Profit)", "E(ROI)", "Target Buy", "Days", "",
                    ] {
                        header.col(|ui| {
                            ui.label(RichText::new(title).color(HEADER).strong());
                        });
                    }
                })
                .body(|body| {
                    body.rows(30.0, visible.len(), |mut row| {
                        let idx = visible[row.index()];
                        let r = &rows[idx];
                        let m = &r.metrics;
                        let o = &r.listing.observation;
                        let is_selected = selected == Some(idx);

                        row.col(|ui| {
                            let (icon, color) = if r.is_tracked() { ("★", GOLD) } else { ("☆", Color32::GRAY) };
                            if ui.button(RichText::new(icon).color(color)).on_hover_text("Track order").clicked() {
                                toggled = Some(idx);
                            }
                        });
                        row.col(|ui| {
                            let mut text = RichText::new(&r.listing.name);
                            if is_selected {
                                text = text.color(GOLD).strong();
                            } else if r.actionable() {
                                text = text.color(GOOD);
                            }
                            if ui.selectable_label(is_selected, text).clicked() {
                                clicked = Some(idx);
                            }
                        });
                        row.col(|ui| {
                            ui.label(format_gold(o.buy_price));
                        });
                        row.col(|ui| {
                            ui.label(format_gold(o.sell_price));
                        });
                        row.col(|ui| {
                            let color = if m.unit_profit > 0.0 { GOOD } else { BAD };
                            ui.label(RichText::new(format_gold(m.unit_profit)).color(color).strong());
                        });
                        row.col(|ui| {
                            ui.label(format_pct(m.flip_through_rate));
                        });
                        row.col(|ui| {
                            ui.label(m.optimal_quantity.map(|q| q.to_string()).unwrap_or_else(|| "-".into()));
                        });
                        row.col(|ui| {
                            ui.label(format_opt(m.expected_profit_at_optimal, format_gold));
                        });
                        row.col(|ui| {
                            ui.label(format_opt(m.expected_roi_at_optimal, format_pct));
                        });
                        row.col(|ui| {
                            let color = if m.target_price_above_market { BAD } else { HEADER };
                            ui.label(RichText::new(format_gold(m.optimal_buy_price_for_target_roi)).color(color))
                                .on_hover_text(if m.target_price_above_market {
                                    "Above the current buy price"
                                } else {
                                    "Highest buy price that meets the target ROI"
                                });
                        });
                        row.col(|ui| {
                            ui.label(format_opt(m.time_to_sell, |d| format!("{d:.1}")));
                        });
                        row.col(|ui| {
                            ui.hyperlink_to("↗", &r.listing.link);
                        });
                    });
                });
        });

        if let Some(idx) = toggled {
            self.toggle_track(idx);
        }
        if let Some(idx) = clicked {
            self.select(idx);
        }

        if let Some(idx) = self.selected {
            ui.separator();
            self.details(ui, idx);
        }
    }

    fn details(&mut self, ui: &mut egui::Ui, idx: usize) {
        let mut save = false;
        let mut toggle = false;

        egui::Frame::new()
            .fill(Color32::from_rgb(32, 28, 23))
            .stroke(Stroke::new(1.0, Color32::from_rgb(100, 82, 50)))
            .inner_margin(Margin::same(10))
            .show(ui, |ui| {
                let Some(row) = self.scan.rows.get_mut(idx) else { return };
                let m = &row.metrics;
                let o = &row.listing.observation;

                ui.horizontal(|ui| {
                    ui.label(RichText::new(&row.listing.name).color(GOLD).strong().size(17.0));
                    ui.separator();
                    ui.label(format!(
                        "Supply {}  Demand {}  Bought {}  Sold {}  Bids {}  Offers {}",
                        o.supply, o.demand, o.bought, o.sold, o.bids, o.offers
                    ));
                });
                ui.horizontal(|ui| {
                    ui.label(format!("Buy-through {}", format_pct(m.buy_through_rate)));
                    ui.label(format!("Sell-through {}", format_pct(m.sell_through_rate)));
                    ui.label(format!("E(Profit | 1) {}", format_gold(m.expected_profit_single)));
                    ui.label(format!("Investment {}", format_opt(m.optimal_investment, format_gold)));
                    ui.label(format!(
                        "Target qty {}  return {}",
                        m.optimal_quantity_for_target_roi.map(|q| q.to_string()).unwrap_or_else(|| "-".into()),
                        format_opt(m.theoretical_return_for_target_roi, format_gold)
                    ));
                });
                if let Some(h) = &row.history {
                    ui.label(format!(
                        "{}d median buy {} (sd {:.4})  sell {} (sd {:.4})",
                        self.config.history_days,
                        format_gold(h.avg_buy_price),
                        h.std_dev_buy_price,
                        format_gold(h.avg_sell_price),
                        h.std_dev_sell_price
                    ));
                }

                ui.horizontal(|ui| match &mut row.order {
                    Some(order) => {
                        ui.label("Qty");
                        ui.add(egui::DragValue::new(&mut order.qty_ordered).range(1..=250_000));
                        ui.label("Buy");
                        ui.add(egui::DragValue::new(&mut order.buy_price).range(0.0..=100_000.0).speed(0.01));
                        ui.checkbox(&mut order.buy_placed, "Buy placed");
                        ui.checkbox(&mut order.sell_placed, "Sell placed");
                        ui.checkbox(&mut order.sold, "Sold");
                        save = ui.button("Save order").clicked();
                        toggle = ui.button("Stop tracking").clicked();
                    }
                    None => {
                        toggle = ui.button("Track this item").clicked();
                    }
                });

                if self.selected_history.len() > 1 {
                    let buys: PlotPoints = self
                        .selected_history
                        .iter()
                        .enumerate()
                        .map(|(i, (_, b, _))| [i as f64, *b])
                        .collect();
                    let sells: PlotPoints = self
                        .selected_history
                        .iter()
                        .enumerate()
                        .map(|(i, (_, _, s))| [i as f64, *s])
                        .collect();
                    Plot::new("item_history")
                        .legend(Legend::default())
                        .height(160.0)
                        .allow_zoom(false)
                        .allow_drag(false)
                        .x_axis_label("scrape")
                        .show(ui, |plot_ui| {
                            plot_ui.line(Line::new("Buy", buys).color(BAD));
                            plot_ui.line(Line::new("Sell", sells).color(GOOD));
                        });
                }
            });

        if save {
            self.save_order(idx);
        }
        if toggle {
            self.toggle_track(idx);
        }
    }

    fn profit_view(&mut self, ui: &mut egui::Ui) {
        let Some(scan) = &self.profit else {
            ui.centered_and_justified(|ui| {
                ui.label(RichText::new("Run the profit report to see your trading post history").size(20.0).color(HEADER));
            });
            return;
        };

        if scan.rows.is_empty() {
            ui.label(format!("No transactions to report for the last {} days.", scan.days));
            return;
        }

        let total: f64 = scan.rows.iter().map(|r| r.profit).sum();
        ui.horizontal(|ui| {
            ui.label(RichText::new(format!("Last {} days", scan.days)).color(HEADER));
            ui.separator();
            let color = if total >= 0.0 { GOOD } else { BAD };
            ui.label(RichText::new(format!("Total profit {}", format_gold(total))).color(color).strong());
            if let Some(html) = &scan.html {
                ui.separator();
                if ui.button("Open HTML report").clicked() {
                    ui.ctx().open_url(egui::OpenUrl::new_tab(file_url(html)));
                }
            }
        });

        let bars: Vec<Bar> = scan
            .rows
            .iter()
            .filter(|r| r.profit > 0.0)
            .take(10)
            .enumerate()
            .map(|(i, r)| Bar::new(i as f64, r.profit).name(&r.name).fill(GOLD))
            .collect();
        Plot::new("profit_chart")
            .height(220.0)
            .allow_zoom(false)
            .allow_drag(false)
            .y_axis_label("gold")
            .show(ui, |plot_ui| {
                plot_ui.bar_chart(BarChart::new("Top 10 by profit", bars).color(GOLD));
            });

        ui.separator();
        TableBuilder::new(ui)
            .striped(true)
            .vscroll(true)
            .column(Column::remainder().at_least(200.0).clip(true))
            .columns(Column::exact(100.0), 6)
            .header(28.0, |mut header| {
                for title in ["Item Name", "Bought", "Sold", "Spent", "Received", "Profit", "ROI"] {
                    header.col(|ui| {
                        ui.label(RichText::new(title).color(HEADER).strong());
                    });
                }
            })
            .body(|body| {
                body.rows(26.0, scan.rows.len(), |mut row| {
                    let r = &scan.rows[row.index()];
                    row.col(|ui| {
                        ui.label(&r.name);
                    });
                    row.col(|ui| {
                        ui.label(r.bought_qty.to_string());
                    });
                    row.col(|ui| {
                        ui.label(r.sold_qty.to_string());
                    });
                    row.col(|ui| {
                        ui.label(format_gold(r.spent));
                    });
                    row.col(|ui| {
                        ui.label(format_gold(r.received));
                    });
                    row.col(|ui| {
                        let color = if r.profit >= 0.0 { GOOD } else { BAD };
                        ui.label(RichText::new(format_gold(r.profit)).color(color));
                    });
                    row.col(|ui| {
                        ui.label(format_opt(r.roi, format_pct));
                    });
                });
            });
    }
}

impl eframe::App for Gw2App {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        self.poll_jobs(ctx);

        if ctx.input(|i| i.viewport().close_requested()) {
            self.save_config();
        }

        egui::TopBottomPanel::top("top").show(ctx, |ui| self.top_bar(ui));

        egui::TopBottomPanel::bottom("log")
            .resizable(true)
            .default_height(140.0)
            .show(ctx, |ui| {
                ui.label(RichText::new("Log").color(HEADER).strong());
                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .auto_shrink([false, false])
                    .show(ui, |ui| {
                        for line in &self.log {
                            ui.label(RichText::new(line).monospace());
                        }
                    });
            });

        if self.tab == Tab::Flips && !self.scan.rows.is_empty() {
            egui::SidePanel::right("filters")
                .min_width(250.0)
                .max_width(320.0)
                .show(ctx, |ui| self.side_panel(ui));
        }

        egui::CentralPanel::default().show(ctx, |ui| match self.tab {
            Tab::Flips => self.flips_view(ui),
            Tab::Profit => self.profit_view(ui),
        });

        if self.busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}

fn file_url(path: &Path) -> String {
    let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", abs.display())
}

/// Decimal gold as `12g 34s`.
fn format_gold(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let silver_total = (value.abs() * 100.0).round() as u64;
    let (g, s) = (silver_total / 100, silver_total % 100);
    if g > 0 {
        format!("{sign}{g}g {s:02}s")
    } else {
        format!("{sign}{s}s")
    }
}

fn format_pct(v: f64) -> String {
    format!("{:.0}%", v * 100.0)
}

fn format_opt(v: Option<f64>, f: impl Fn(f64) -> String) -> String {
    v.map(f).unwrap_or_else(|| "-".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw2_analyzer::metrics::compute_metrics;
    use gw2_analyzer::model::{ItemListing, MarketObservation, Parameters};

    fn row(name: &str, buy: f64, sell: f64) -> FlipRow {
        let observation = MarketObservation {
            item_id: name.into(),
            buy_price: buy,
            sell_price: sell,
            supply: 10,
            demand: 10,
            bought: 20,
            sold: 20,
            bids: 40,
            offers: 20,
        };
        FlipRow {
            metrics: compute_metrics(&observation, &Parameters::default()),
            listing: ItemListing {
                name: name.into(),
                link: String::new(),
                observation,
            },
            scraped_at: String::new(),
            history: None,
            order: None,
        }
    }

    #[test]
    fn toggle_order_tracks_then_untracks() {
        let store = Store::in_memory().unwrap();
        let mut r = row("Ectoplasm", 1.0, 2.0);

        toggle_order(&store, &mut r).unwrap();
        assert!(r.order.is_some());
        assert_eq!(store.load_orders().unwrap().len(), 1);

        toggle_order(&store, &mut r).unwrap();
        assert!(r.order.is_none());
        assert!(store.load_orders().unwrap().is_empty());
    }

    #[test]
    fn failed_store_write_leaves_row_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DB_FILE);
        let store = Store::open(&path).unwrap();
        let mut r = row("Ectoplasm", 1.0, 2.0);
        toggle_order(&store, &mut r).unwrap();
        let tracked = r.order.clone();

        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE orders")
            .unwrap();

        assert!(toggle_order(&store, &mut r).is_err());
        assert_eq!(r.order, tracked);

        let mut fresh = row("Dust", 0.1, 0.2);
        assert!(toggle_order(&store, &mut fresh).is_err());
        assert!(fresh.order.is_none());
    }

    #[test]
    fn gold_formatting() {
        assert_eq!(format_gold(1.23), "1g 23s");
        assert_eq!(format_gold(0.07), "7s");
        assert_eq!(format_gold(-2.5), "-2g 50s");
        assert_eq!(format_gold(10.0), "10g 00s");
    }

    #[test]
    fn filters_and_sorting() {
        let rows = vec![row("Ectoplasm", 1.0, 2.0), row("Dust", 1.0, 1.5), row("Nothing", 0.0, 0.0)];

        let all = visible_rows(&rows, &Filters::default(), SortBy::UnitProfit, SortOrder::Descending);
        assert_eq!(all, [0, 1]);

        let by_name = visible_rows(&rows, &Filters::default(), SortBy::Name, SortOrder::Ascending);
        assert_eq!(by_name, [1, 0]);

        let search = Filters { search: "ECTO".into(), ..Default::default() };
        assert_eq!(visible_rows(&rows, &search, SortBy::Buy, SortOrder::Ascending), [0]);

        let strict = Filters { min_unit_profit: 0.1, ..Default::default() };
        assert_eq!(visible_rows(&rows, &strict, SortBy::UnitProfit, SortOrder::Descending), [0]);
    }

    #[test]
    fn tracked_rows_survive_market_filter() {
        let mut rows = vec![row("Nothing", 0.0, 0.0)];
        rows[0].order = Some(order_from_row(&rows[0]));
        assert_eq!(visible_rows(&rows, &Filters::default(), SortBy::Sell, SortOrder::Ascending), [0]);
        let tracked = Filters { tracked_only: true, ..Default::default() };
        assert_eq!(visible_rows(&rows, &tracked, SortBy::Sell, SortOrder::Ascending), [0]);
    }

    #[test]
    fn new_order_uses_engine_prices() {
        let r = row("Ectoplasm", 1.0, 2.0);
        let order = order_from_row(&r);
        assert_eq!(order.item_id, "Ectoplasm");
        assert!(order.qty_ordered >= 1);
        assert_eq!(order.buy_price, r.metrics.overcut_price);
        assert_eq!(order.sell_price, Some(r.metrics.undercut_price));
        assert!(order.buy_placed);
    }
}
