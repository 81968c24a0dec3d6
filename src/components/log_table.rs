use eframe::egui;
use egui::{Color32, RichText, TextEdit};
use uuid::Uuid;

use crate::annotations::{AnnotationStore, Anomaly, Severity, Source, USER_CLASSIFICATIONS};
use crate::viewer::severity_color;

/// One requested store mutation from the log table. The table never mutates
/// the store itself; the app applies these after layout so provenance
/// rejections can be routed to the right dialog.
#[derive(Clone, Debug)]
pub enum LogAction {
    SetSeverity(Uuid, Option<Severity>),
    SetClassification(Uuid, Option<String>),
    SetComment(Uuid, String),
    RequestDelete(Uuid),
    Restore(Uuid),
}

// ============================================================================
// ANALYSIS LOG TABLE
// ============================================================================

/// Tabular review of every anomaly record: severity/classification dropdowns
/// (user boxes only; AI fields render read-only), free-text comments,
/// delete, and a collapsed list of tombstoned records with restore.
#[derive(Default)]
pub struct AnalysisLog {
    /// Row the pointer is over this frame; the viewer emphasizes that box.
    pub hovered_row: Option<Uuid>,
}

impl AnalysisLog {
    /// `highlight` is the record whose overlay is hovered in the viewer.
    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        store: &AnnotationStore,
        highlight: Option<Uuid>,
    ) -> Vec<LogAction> {
        let mut actions = Vec::new();
        self.hovered_row = None;

        ui.horizontal(|ui| {
            ui.heading("Analysis Log");
            ui.label(
                RichText::new(format!("{} anomalies", store.visible().count()))
                    .color(Color32::from_gray(150)),
            );
        });
        ui.separator();

        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui| {
                egui::Grid::new("analysis_log_grid")
                    .striped(true)
                    .num_columns(8)
                    .min_col_width(40.0)
                    .show(ui, |ui| {
                        for title in [
                            "#",
                            "Source",
                            "Confidence",
                            "Severity",
                            "Classification",
                            "Position",
                            "Comment",
                            "",
                        ] {
                            ui.label(RichText::new(title).strong());
                        }
                        ui.end_row();

                        for (index, record) in store.visible().enumerate() {
                            self.row(ui, index, record, highlight, &mut actions);
                            ui.end_row();
                        }
                    });

                let deleted: Vec<&Anomaly> = store.tombstoned().collect();
                if !deleted.is_empty() {
                    ui.add_space(6.0);
                    egui::CollapsingHeader::new(format!("Deleted ({})", deleted.len()))
                        .default_open(false)
                        .show(ui, |ui| {
                            for record in deleted {
                                ui.horizontal(|ui| {
                                    ui.label(record.source.label());
                                    ui.label(
                                        record
                                            .classification
                                            .as_deref()
                                            .unwrap_or("Unclassified"),
                                    );
                                    if !record.comment.is_empty() {
                                        ui.label(
                                            RichText::new(&record.comment)
                                                .italics()
                                                .color(Color32::from_gray(150)),
                                        );
                                    }
                                    if ui.button("Restore").clicked() {
                                        actions.push(LogAction::Restore(record.id));
                                    }
                                });
                            }
                        });
                }
            });

        actions
    }

    fn row(
        &mut self,
        ui: &mut egui::Ui,
        index: usize,
        record: &Anomaly,
        highlight: Option<Uuid>,
        actions: &mut Vec<LogAction>,
    ) {
        let color = severity_color(record.severity);
        let mut number = RichText::new(format!("{}", index + 1)).color(color);
        if highlight == Some(record.id) {
            number = number.strong();
        }
        let response = ui.label(number);
        if response.hovered() {
            self.hovered_row = Some(record.id);
        }

        ui.label(record.source.label());
        ui.label(match record.confidence {
            Some(c) => format!("{:.0}%", c * 100.0),
            None => "—".to_string(),
        });

        match record.source {
            // AI verdicts are read-only; disagreement is expressed by
            // deleting the record with a reason.
            Source::Ai => {
                ui.label(record.severity.map(|s| s.label()).unwrap_or("—"));
                ui.label(record.classification.as_deref().unwrap_or("—"));
            }
            Source::User => {
                self.severity_combo(ui, record, actions);
                self.classification_combo(ui, record, actions);
            }
        }

        let details = ui.label(format!(
            "({:.0}, {:.0}) {:.0}×{:.0}",
            record.x, record.y, record.w, record.h
        ));
        if let Some(user) = &record.user_id {
            let when = record
                .updated_at
                .as_deref()
                .map(|t| format!(" at {}", t))
                .unwrap_or_default();
            details.on_hover_text(format!("Last saved by {}{}", user, when));
        }

        let mut comment = record.comment.clone();
        if ui
            .add(TextEdit::singleline(&mut comment).hint_text("Comment").desired_width(180.0))
            .changed()
        {
            actions.push(LogAction::SetComment(record.id, comment));
        }

        if ui.button("Delete").clicked() {
            actions.push(LogAction::RequestDelete(record.id));
        }
    }

    fn severity_combo(&self, ui: &mut egui::Ui, record: &Anomaly, actions: &mut Vec<LogAction>) {
        let mut current = record.severity;
        egui::ComboBox::from_id_source((record.id, "severity"))
            .selected_text(current.map(|s| s.label()).unwrap_or("—"))
            .show_ui(ui, |ui| {
                let mut changed = ui.selectable_value(&mut current, None, "—").changed();
                for sev in Severity::all() {
                    changed |= ui
                        .selectable_value(&mut current, Some(*sev), sev.label())
                        .changed();
                }
                if changed {
                    actions.push(LogAction::SetSeverity(record.id, current));
                }
            });
    }

    fn classification_combo(
        &self,
        ui: &mut egui::Ui,
        record: &Anomaly,
        actions: &mut Vec<LogAction>,
    ) {
        let mut current = record.classification.clone();
        egui::ComboBox::from_id_source((record.id, "classification"))
            .selected_text(current.as_deref().unwrap_or("—"))
            .show_ui(ui, |ui| {
                let mut changed = ui.selectable_value(&mut current, None, "—").changed();
                for label in USER_CLASSIFICATIONS {
                    changed |= ui
                        .selectable_value(&mut current, Some(label.to_string()), *label)
                        .changed();
                }
                if changed {
                    actions.push(LogAction::SetClassification(record.id, current));
                }
            });
    }
}
