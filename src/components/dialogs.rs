use std::time::{Duration, Instant};

use eframe::egui;
use egui::{Align2, Color32, RichText};
use uuid::Uuid;

/// How long a transient notice stays on screen.
const NOTICE_TTL: Duration = Duration::from_secs(4);

// ============================================================================
// MODAL DIALOGS + TRANSIENT NOTICES
// ============================================================================

/// Confirmation gate in front of clear-all. Returns true on the frame the
/// user confirms.
#[derive(Default)]
pub struct ConfirmClear {
    pub open: bool,
}

impl ConfirmClear {
    pub fn show(&mut self, ctx: &egui::Context) -> bool {
        if !self.open {
            return false;
        }
        let mut confirmed = false;
        egui::Window::new("Clear all annotations?")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("Every annotation, AI and manual alike, will be removed.");
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button(RichText::new("Clear").color(Color32::LIGHT_RED)).clicked() {
                        confirmed = true;
                        self.open = false;
                    }
                    if ui.button("Cancel").clicked() {
                        self.open = false;
                    }
                });
            });
        confirmed
    }
}

/// Prompt for the mandatory deletion reason on AI records. Returns the
/// `(record, reason)` pair on the frame the user confirms.
#[derive(Default)]
pub struct DeleteReason {
    target: Option<Uuid>,
    reason: String,
}

impl DeleteReason {
    pub fn open_for(&mut self, id: Uuid) {
        self.target = Some(id);
        self.reason.clear();
    }

    pub fn is_open(&self) -> bool {
        self.target.is_some()
    }

    pub fn show(&mut self, ctx: &egui::Context) -> Option<(Uuid, String)> {
        let id = self.target?;
        let mut result = None;
        egui::Window::new("Delete AI detection")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("AI detections need a stated reason before deletion.");
                ui.add_space(4.0);
                ui.text_edit_singleline(&mut self.reason);
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    let valid = !self.reason.trim().is_empty();
                    if ui
                        .add_enabled(valid, egui::Button::new("Delete"))
                        .clicked()
                    {
                        result = Some((id, std::mem::take(&mut self.reason)));
                        self.target = None;
                    }
                    if ui.button("Cancel").clicked() {
                        self.target = None;
                        self.reason.clear();
                    }
                });
            });
        result
    }
}

/// Short-lived status messages (failed saves, failed analysis), stacked in
/// the bottom-right corner.
#[derive(Default)]
pub struct Notices {
    items: Vec<(String, Instant)>,
}

impl Notices {
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push((message.into(), Instant::now()));
    }

    pub fn any_active(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn show(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        self.items.retain(|(_, at)| now.duration_since(*at) < NOTICE_TTL);
        if self.items.is_empty() {
            return;
        }
        egui::Area::new(egui::Id::new("thermomark_notices"))
            .anchor(Align2::RIGHT_BOTTOM, [-12.0, -12.0])
            .show(ctx, |ui| {
                for (message, _) in &self.items {
                    egui::Frame::popup(&ctx.style()).show(ui, |ui| {
                        ui.label(RichText::new(message).color(Color32::LIGHT_RED));
                    });
                }
            });
    }
}
