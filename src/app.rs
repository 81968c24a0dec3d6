use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use egui::{Align2, Color32, FontId, Rect, RichText, TextureHandle, TextureOptions, vec2};

use crate::annotations::{AnnotationStore, AnomalyPatch, DeleteRejection, StoreChange};
use crate::components::dialogs::{ConfirmClear, DeleteReason, Notices};
use crate::components::log_table::{AnalysisLog, LogAction};
use crate::geometry::{self, NaturalSize};
use crate::inference::{
    AnalysisResult, AnalysisRunner, AnomalyDetector, BuiltinDetector, detections_to_records,
};
use crate::interaction::BoxInteractionController;
use crate::sync::{AnnotationRepository, JsonFileRepository, PersistenceSync};
use crate::viewer::{ViewMode, Viewer};
use crate::viewport::{ViewportController, WHEEL_ZOOM_STEP};
use crate::{log_err, log_info, log_warn, logger};

/// A decoded image plus its GPU texture and intrinsic size.
struct LoadedImage {
    bytes: Vec<u8>,
    texture: TextureHandle,
    natural: NaturalSize,
}

/// Where the AI analysis step stands, for the progress strip.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum AnalysisState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

// ============================================================================
// APPLICATION
// ============================================================================

/// Top-level editor state: one open inspection, its annotation set, the
/// image pair, and the viewport/interaction/persistence machinery around
/// them.
pub struct ThermoMarkApp {
    // Inspection identity. Persistence is keyed by the inspection id; pushes
    // carry the transformer and actor as audit fields.
    inspection_id: String,
    transformer_id: String,

    store: AnnotationStore,
    viewport: ViewportController,
    interaction: BoxInteractionController,
    viewer: Viewer,
    log: AnalysisLog,

    sync: PersistenceSync,
    /// Set by the store subscription on every mutation; drained once per
    /// frame into the save debouncer.
    store_dirty: Rc<Cell<bool>>,

    detector: Arc<dyn AnomalyDetector>,
    analysis: AnalysisRunner,
    analysis_state: AnalysisState,
    threshold: f32,

    baseline: Option<LoadedImage>,
    maintenance: Option<LoadedImage>,
    /// Annotated raster returned by the last analysis run; displayed in
    /// place of the raw maintenance image once present.
    annotated: Option<LoadedImage>,

    view_mode: ViewMode,
    /// Width of the annotated-image column last frame, for fit-to-width.
    viewer_width: f32,

    confirm_clear: ConfirmClear,
    delete_reason: DeleteReason,
    notices: Notices,
}

impl ThermoMarkApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let inspection_id =
            std::env::var("THERMOMARK_INSPECTION").unwrap_or_else(|_| "demo-inspection".into());
        let transformer_id =
            std::env::var("THERMOMARK_TRANSFORMER").unwrap_or_else(|_| "TX-01".into());
        let user_id = std::env::var("THERMOMARK_USER").unwrap_or_else(|_| "Admin".into());

        let repo_dir = std::env::var("THERMOMARK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| logger::data_dir().join("ThermoMark").join("annotations"));
        let repository: Arc<dyn AnnotationRepository> =
            Arc::new(JsonFileRepository::new(repo_dir));
        let sync = PersistenceSync::new(repository, user_id.clone());

        let mut store = AnnotationStore::new();
        let store_dirty = Rc::new(Cell::new(false));
        let flag = store_dirty.clone();
        store.subscribe(Box::new(move |change| {
            // Loads come FROM the repository; echoing them back would save
            // what was just read.
            if !matches!(change, StoreChange::Loaded) {
                flag.set(true);
            }
        }));

        let mut viewport = ViewportController::new();
        let repaint_ctx = cc.egui_ctx.clone();
        viewport.subscribe(Box::new(move |_| repaint_ctx.request_repaint()));

        log_info!(
            "Opening inspection {} (transformer {}, user {})",
            inspection_id,
            transformer_id,
            user_id
        );
        sync.begin_load(&inspection_id);

        Self {
            inspection_id,
            transformer_id,
            store,
            viewport,
            interaction: BoxInteractionController::new(),
            viewer: Viewer::default(),
            log: AnalysisLog::default(),
            sync,
            store_dirty,
            detector: Arc::new(BuiltinDetector),
            analysis: AnalysisRunner::new(),
            analysis_state: AnalysisState::Pending,
            threshold: 0.5,
            baseline: None,
            maintenance: None,
            annotated: None,
            view_mode: ViewMode::Zoom,
            viewer_width: 800.0,
            confirm_clear: ConfirmClear::default(),
            delete_reason: DeleteReason::default(),
            notices: Notices::default(),
        }
    }

    fn load_image(
        ctx: &egui::Context,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<LoadedImage, String> {
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| format!("Failed to decode image: {}", e))?;
        let rgba = decoded.to_rgba8();
        let (w, h) = rgba.dimensions();
        let color_image =
            egui::ColorImage::from_rgba_unmultiplied([w as usize, h as usize], &rgba);
        let texture = ctx.load_texture(name, color_image, TextureOptions::LINEAR);
        Ok(LoadedImage {
            bytes,
            texture,
            natural: NaturalSize::new(w as f32, h as f32),
        })
    }

    fn pick_and_load(&mut self, ctx: &egui::Context, name: &str) -> Option<LoadedImage> {
        let path = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg"])
            .pick_file()?;
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                self.notices.push(format!("Could not read {}: {}", path.display(), e));
                log_err!("Read failed for {}: {}", path.display(), e);
                return None;
            }
        };
        match Self::load_image(ctx, name, bytes) {
            Ok(img) => {
                log_info!("Loaded {} image {} ({}x{})", name, path.display(), img.natural.w, img.natural.h);
                Some(img)
            }
            Err(e) => {
                self.notices.push(e.clone());
                log_err!("{}", e);
                None
            }
        }
    }

    // ---- background results ------------------------------------------------

    fn drain_sync(&mut self) {
        use crate::sync::SyncResult;
        for result in self.sync.poll() {
            match result {
                SyncResult::Loaded { inspection_id, records } => {
                    if inspection_id != self.inspection_id {
                        continue;
                    }
                    if records.is_empty() {
                        log_info!("No stored annotations for {}", inspection_id);
                        continue;
                    }
                    log_info!("Loaded {} annotations for {}", records.len(), inspection_id);
                    // Stored state wins over whatever defaults were shown.
                    self.store.load_persisted(
                        records.into_iter().map(|r| r.into_anomaly()).collect(),
                    );
                }
                SyncResult::LoadFailed { inspection_id, error } => {
                    log_warn!("Annotation load failed for {}: {}", inspection_id, error);
                }
                SyncResult::Saved { token } => {
                    log_info!("Annotations saved (token {})", token);
                }
                SyncResult::SaveFailed { token, error } => {
                    log_err!("Annotation save failed (token {}): {}", token, error);
                    self.notices.push(format!("Save failed: {}", error));
                }
            }
        }
    }

    fn drain_analysis(&mut self, ctx: &egui::Context) {
        let Some(result) = self.analysis.poll() else {
            return;
        };
        match result {
            AnalysisResult::Done(outcome) => {
                match Self::load_image(ctx, "annotated", outcome.annotated_image.clone()) {
                    Ok(img) => {
                        self.viewport.set_image(img.natural);
                        self.annotated = Some(img);
                    }
                    Err(e) => {
                        self.analysis_state = AnalysisState::Failed;
                        self.notices.push(e.clone());
                        log_err!("{}", e);
                        return;
                    }
                }
                log_info!("Analysis finished with {} detections", outcome.detections.len());
                self.analysis_state = AnalysisState::Completed;
                self.interaction.cancel();
                self.view_mode = ViewMode::Zoom;
                self.store.replace_all(detections_to_records(&outcome.detections));
            }
            AnalysisResult::Failed(error) => {
                self.analysis_state = AnalysisState::Failed;
                log_err!("Analysis failed: {}", error);
                self.notices.push(format!("Analysis failed: {}", error));
            }
        }
    }

    // ---- toolbar -------------------------------------------------------------

    fn toolbar(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("ThermoMark");
            ui.separator();
            ui.label(format!("Inspection {}", self.inspection_id));
            ui.label(
                RichText::new(format!("Transformer {}", self.transformer_id))
                    .color(Color32::from_gray(150)),
            );
        });

        ui.horizontal(|ui| {
            if ui.button("Baseline…").clicked()
                && let Some(img) = self.pick_and_load(ctx, "baseline")
            {
                self.baseline = Some(img);
            }
            if ui.button("Thermal…").clicked()
                && let Some(img) = self.pick_and_load(ctx, "maintenance")
            {
                self.viewport.set_image(img.natural);
                self.maintenance = Some(img);
                self.annotated = None;
                self.analysis_state = AnalysisState::Pending;
            }
            ui.separator();

            ui.add(
                egui::Slider::new(&mut self.threshold, 0.0..=1.0)
                    .text("Confidence threshold"),
            );
            let ready = self.baseline.is_some()
                && self.maintenance.is_some()
                && !self.analysis.is_running();
            if ui.add_enabled(ready, egui::Button::new("Run AI Analysis")).clicked()
                && let (Some(baseline), Some(maintenance)) =
                    (&self.baseline, &self.maintenance)
            {
                self.analysis_state = AnalysisState::Running;
                log_info!("Starting analysis at threshold {:.2}", self.threshold);
                self.analysis.begin(
                    self.detector.clone(),
                    baseline.bytes.clone(),
                    maintenance.bytes.clone(),
                    self.threshold,
                );
            }
            ui.separator();
            self.progress_strip(ui);
        });

        ui.horizontal(|ui| {
            for mode in [ViewMode::Zoom, ViewMode::Edit] {
                if ui
                    .selectable_label(self.view_mode == mode, mode.label())
                    .clicked()
                    && self.view_mode != mode
                {
                    self.view_mode = mode;
                    self.interaction.cancel();
                    if mode == ViewMode::Edit {
                        // Edit mode uses the narrower slider bounds.
                        self.viewport.set_slider_zoom(self.viewport.zoom());
                    }
                }
            }
            ui.separator();

            match self.view_mode {
                ViewMode::Zoom => {
                    if ui.button("−").clicked() {
                        self.viewport.zoom_by(1.0 / WHEEL_ZOOM_STEP, None, Rect::ZERO);
                    }
                    ui.label(format!("{:.0}%", self.viewport.zoom() * 100.0));
                    if ui.button("+").clicked() {
                        self.viewport.zoom_by(WHEEL_ZOOM_STEP, None, Rect::ZERO);
                    }
                    if ui.button("Reset").clicked() {
                        self.viewport.reset_view();
                    }
                    if ui.button("Fit width").clicked() {
                        self.viewport.fit_to_width(self.viewer_width);
                    }
                }
                ViewMode::Edit => {
                    let mut zoom = self.viewport.zoom();
                    if ui
                        .add(egui::Slider::new(&mut zoom, 1.0..=3.0).text("Zoom"))
                        .changed()
                    {
                        self.viewport.set_slider_zoom(zoom);
                    }
                    ui.separator();
                    if self.interaction.is_armed() {
                        if ui.button("Cancel Add").clicked() {
                            self.interaction.disarm();
                        }
                        ui.label(
                            RichText::new("Drag on the image to draw a box")
                                .color(Color32::from_gray(150)),
                        );
                    } else if ui.button("Add Manual Box").clicked() {
                        self.interaction.arm_draw();
                    }
                }
            }
            ui.separator();
            if ui
                .add_enabled(!self.store.is_empty(), egui::Button::new("Clear Annotations"))
                .clicked()
            {
                self.confirm_clear.open = true;
            }
        });
    }

    fn progress_strip(&self, ui: &mut egui::Ui) {
        let done = Color32::from_rgb(67, 160, 71);
        let pending = Color32::from_gray(120);
        let failed = Color32::from_rgb(229, 57, 53);

        let upload = if self.maintenance.is_some() { ("Thermal ✓", done) } else { ("Thermal", pending) };
        let analysis = match self.analysis_state {
            AnalysisState::Pending => ("Analysis", pending),
            AnalysisState::Running => ("Analysis…", Color32::from_rgb(251, 140, 0)),
            AnalysisState::Completed => ("Analysis ✓", done),
            AnalysisState::Failed => ("Analysis ✗", failed),
        };
        let review = if self.store.is_empty() { ("Review", pending) } else { ("Review…", done) };

        for (label, color) in [upload, analysis, review] {
            ui.label(RichText::new(label).color(color));
        }
    }

    // ---- log-table actions ---------------------------------------------------

    fn apply_log_actions(&mut self, actions: Vec<LogAction>) {
        for action in actions {
            match action {
                LogAction::SetSeverity(id, severity) => {
                    if let Err(e) = self.store.edit(id, AnomalyPatch::severity(severity)) {
                        log_warn!("Severity edit refused for {}: {:?}", id, e);
                    }
                }
                LogAction::SetClassification(id, label) => {
                    if let Err(e) = self.store.edit(id, AnomalyPatch::classification(label)) {
                        log_warn!("Classification edit refused for {}: {:?}", id, e);
                    }
                }
                LogAction::SetComment(id, comment) => {
                    if let Err(e) = self.store.edit(id, AnomalyPatch::comment(comment)) {
                        log_warn!("Comment edit refused for {}: {:?}", id, e);
                    }
                }
                LogAction::RequestDelete(id) => match self.store.soft_delete(id) {
                    Ok(()) => {}
                    Err(DeleteRejection::ReasonRequired) => self.delete_reason.open_for(id),
                    Err(DeleteRejection::UnknownId) => {
                        log_warn!("Delete requested for unknown record {}", id);
                    }
                },
                LogAction::Restore(id) => self.store.restore(id),
            }
        }
    }
}

// ============================================================================
// FRAME LOOP
// ============================================================================

impl eframe::App for ThermoMarkApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_sync();
        self.drain_analysis(ctx);

        // Mutations from last frame re-arm the save window.
        if self.store_dirty.take() {
            self.sync.debouncer.schedule();
        }
        self.sync.maybe_push(
            &self.store,
            Some(&self.inspection_id),
            &self.transformer_id,
            Instant::now(),
        );

        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            self.interaction.cancel();
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.toolbar(ctx, ui);
        });

        egui::TopBottomPanel::bottom("analysis_log")
            .resizable(true)
            .default_height(220.0)
            .show(ctx, |ui| {
                let actions = self.log.show(ui, &self.store, self.viewer.hovered_box);
                self.apply_log_actions(actions);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.columns(2, |cols| {
                cols[0].label(RichText::new(pane_caption("Baseline", self.baseline.as_ref())).strong());
                draw_static_image(&mut cols[0], self.baseline.as_ref(), "No baseline image");

                let right_caption = if self.annotated.is_some() {
                    pane_caption("Annotated", self.annotated.as_ref())
                } else {
                    pane_caption("Maintenance", self.maintenance.as_ref())
                };
                cols[1].label(RichText::new(right_caption).strong());
                self.viewer_width = cols[1].available_width();
                self.viewer.highlight = self.log.hovered_row;
                let texture = self
                    .annotated
                    .as_ref()
                    .or(self.maintenance.as_ref())
                    .map(|img| &img.texture);
                self.viewer.show(
                    &mut cols[1],
                    texture,
                    self.view_mode,
                    &mut self.store,
                    &mut self.viewport,
                    &mut self.interaction,
                );
            });
        });

        if self.confirm_clear.show(ctx) {
            log_info!("Clearing all annotations for {}", self.inspection_id);
            self.interaction.cancel();
            self.store.clear_all();
        }
        if let Some((id, reason)) = self.delete_reason.show(ctx) {
            match self.store.edit(id, AnomalyPatch::comment(reason)) {
                Ok(()) => {
                    if let Err(e) = self.store.soft_delete(id) {
                        log_warn!("Delete after stated reason refused for {}: {:?}", id, e);
                    }
                }
                Err(e) => log_warn!("Reason comment refused for {}: {:?}", id, e),
            }
        }
        self.notices.show(ctx);

        // Timers (the save window, a running analysis, notice expiry) need
        // frames even without input.
        if self.sync.debouncer.pending()
            || self.analysis.is_running()
            || self.notices.any_active()
        {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        // Closing drops the pending push rather than flushing it.
        self.sync.debouncer.cancel();
        log_info!("Session closed for inspection {}", self.inspection_id);
    }
}

fn pane_caption(name: &str, image: Option<&LoadedImage>) -> String {
    match image {
        Some(img) => format!("{} — {:.0}×{:.0}", name, img.natural.w, img.natural.h),
        None => name.to_string(),
    }
}

/// Contain-fit a non-interactive image (the baseline pane) into the
/// remaining space.
fn draw_static_image(ui: &mut egui::Ui, image: Option<&LoadedImage>, placeholder: &str) {
    let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::hover());
    let rect = response.rect;
    painter.rect_filled(rect, 0.0, Color32::from_gray(24));
    match image {
        Some(img) => {
            let (scale, offset) = geometry::contain_fit(rect, img.natural);
            let target = Rect::from_min_size(
                rect.min + offset,
                vec2(img.natural.w, img.natural.h) * scale,
            );
            painter.image(
                img.texture.id(),
                target,
                Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                Color32::WHITE,
            );
        }
        None => {
            painter.text(
                rect.center(),
                Align2::CENTER_CENTER,
                placeholder,
                FontId::proportional(14.0),
                Color32::from_gray(140),
            );
        }
    }
}
