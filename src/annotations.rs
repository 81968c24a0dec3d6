use egui::{Rect, pos2};
use uuid::Uuid;

use crate::observe::{SubscriptionId, Subscribers};

/// Minimum committed box edge, in natural pixels.
pub const MIN_BOX_SIZE: f32 = 10.0;

/// Classification choices offered for user-drawn boxes (AI boxes carry
/// whatever label the detector produced).
pub const USER_CLASSIFICATIONS: &[&str] = &[
    "Loose Joint",
    "Point Overload",
    "Full Wire Overload",
    "Other",
];

// ============================================================================
// RECORD TYPES
// ============================================================================

/// Who produced an anomaly record. Fixed at creation, never changes, and
/// controls which fields are editable and what deletion requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Ai,
    User,
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Source::Ai => "AI",
            Source::User => "Manual",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Faulty,
    PotentiallyFaulty,
    Normal,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Faulty => "Faulty",
            Severity::PotentiallyFaulty => "Potentially Faulty",
            Severity::Normal => "Normal",
        }
    }

    pub fn all() -> &'static [Severity] {
        &[Severity::Faulty, Severity::PotentiallyFaulty, Severity::Normal]
    }

    /// Parse the persisted label; unknown strings map to `None`.
    pub fn parse(s: &str) -> Option<Severity> {
        Severity::all().iter().copied().find(|sev| sev.label() == s)
    }
}

/// One annotated region over the inspection image. Geometry is in natural
/// image pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Anomaly {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    /// Detector confidence, present only for AI records.
    pub confidence: Option<f32>,
    pub severity: Option<Severity>,
    pub classification: Option<String>,
    pub comment: String,
    pub source: Source,
    /// Soft-delete tombstone; records are only physically removed by a
    /// full-set replacement.
    pub deleted: bool,
    // Audit metadata, stamped by the persistence layer on write-back.
    pub user_id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Anomaly {
    pub fn rect(&self) -> Rect {
        Rect::from_min_max(pos2(self.x, self.y), pos2(self.x + self.w, self.y + self.h))
    }

    /// True when the comment carries actual content (whitespace is not a
    /// deletion reason).
    pub fn has_comment(&self) -> bool {
        !self.comment.trim().is_empty()
    }
}

/// Partial update applied through [`AnnotationStore::edit`]. Severity and
/// classification are provenance-gated; comments are always editable.
#[derive(Clone, Debug, Default)]
pub struct AnomalyPatch {
    pub severity: Option<Option<Severity>>,
    pub classification: Option<Option<String>>,
    pub comment: Option<String>,
}

impl AnomalyPatch {
    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            comment: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn severity(sev: Option<Severity>) -> Self {
        Self {
            severity: Some(sev),
            ..Default::default()
        }
    }

    pub fn classification(label: Option<String>) -> Self {
        Self {
            classification: Some(label),
            ..Default::default()
        }
    }

    fn touches_gated_fields(&self) -> bool {
        self.severity.is_some() || self.classification.is_some()
    }
}

/// Why an [`AnnotationStore::edit`] call was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditRejection {
    /// Severity/classification are read-only on AI-sourced records.
    AiProvenance,
    UnknownId,
}

/// Why an [`AnnotationStore::soft_delete`] call was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteRejection {
    /// AI records need a non-empty comment as the stated reason first.
    ReasonRequired,
    UnknownId,
}

/// Mutation event published synchronously to store subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreChange {
    Replaced,
    Loaded,
    Added(Uuid),
    Edited(Uuid),
    Moved(Uuid),
    Deleted(Uuid),
    Restored(Uuid),
    Cleared,
}

// ============================================================================
// ANNOTATION STORE
// ============================================================================

/// The canonical in-memory anomaly set for one open inspection. Created when
/// the inspection is opened for review, discarded when the editor closes.
///
/// The store owns provenance legality (who may edit what, what deletion
/// requires); geometry legality (minimum size, non-negative origin) is the
/// interaction layer's job at gesture-commit time.
#[derive(Default)]
pub struct AnnotationStore {
    records: Vec<Anomaly>,
    revision: u64,
    subscribers: Subscribers<StoreChange>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe(&mut self, listener: Box<dyn FnMut(&StoreChange)>) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    fn publish(&mut self, change: StoreChange) {
        self.revision += 1;
        self.subscribers.notify(&change);
    }

    // ---- accessors -------------------------------------------------------

    pub fn all(&self) -> &[Anomaly] {
        &self.records
    }

    pub fn get(&self, id: Uuid) -> Option<&Anomaly> {
        self.records.iter().find(|a| a.id == id)
    }

    /// Non-deleted records, in stable insertion order.
    pub fn visible(&self) -> impl Iterator<Item = &Anomaly> {
        self.records.iter().filter(|a| !a.deleted)
    }

    /// Tombstoned records (shown in the restore list).
    pub fn tombstoned(&self) -> impl Iterator<Item = &Anomaly> {
        self.records.iter().filter(|a| a.deleted)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    // ---- mutations ---------------------------------------------------------

    /// Wholesale substitution after a fresh AI run. Every prior record,
    /// user-drawn ones included, is discarded. Intentional full-replace
    /// policy, not a merge.
    pub fn replace_all(&mut self, records: Vec<Anomaly>) {
        self.records = records;
        self.publish(StoreChange::Replaced);
    }

    /// Replace in-memory state with what the repository returned on
    /// activation.
    pub fn load_persisted(&mut self, records: Vec<Anomaly>) {
        self.records = records;
        self.publish(StoreChange::Loaded);
    }

    /// Insert a user-drawn box with a fresh id and unset severity /
    /// classification. The caller has already normalized and clamped the
    /// geometry.
    pub fn add_user_box(&mut self, rect: Rect) -> Uuid {
        let id = Uuid::new_v4();
        self.records.push(Anomaly {
            id,
            x: rect.min.x,
            y: rect.min.y,
            w: rect.width(),
            h: rect.height(),
            confidence: None,
            severity: None,
            classification: None,
            comment: String::new(),
            source: Source::User,
            deleted: false,
            user_id: None,
            created_at: None,
            updated_at: None,
        });
        self.publish(StoreChange::Added(id));
        id
    }

    /// Apply a partial update. The whole patch is refused if it touches
    /// severity/classification on an AI-sourced record.
    pub fn edit(&mut self, id: Uuid, patch: AnomalyPatch) -> Result<(), EditRejection> {
        let record = self
            .records
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(EditRejection::UnknownId)?;
        if record.source == Source::Ai && patch.touches_gated_fields() {
            return Err(EditRejection::AiProvenance);
        }
        if let Some(sev) = patch.severity {
            record.severity = sev;
        }
        if let Some(class) = patch.classification {
            record.classification = class;
        }
        if let Some(comment) = patch.comment {
            record.comment = comment;
        }
        self.publish(StoreChange::Edited(id));
        Ok(())
    }

    /// Overwrite a record's geometry; called by the interaction layer during
    /// drag/resize, which owns clamping. Unknown ids are a defensive no-op.
    pub fn update_geometry(&mut self, id: Uuid, rect: Rect) {
        if let Some(record) = self.records.iter_mut().find(|a| a.id == id) {
            record.x = rect.min.x;
            record.y = rect.min.y;
            record.w = rect.width();
            record.h = rect.height();
            self.publish(StoreChange::Moved(id));
        }
    }

    /// Tombstone a record. AI records must already carry a non-empty comment
    /// (the stated deletion reason); user records delete unconditionally.
    pub fn soft_delete(&mut self, id: Uuid) -> Result<(), DeleteRejection> {
        let record = self
            .records
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(DeleteRejection::UnknownId)?;
        if record.source == Source::Ai && !record.has_comment() {
            return Err(DeleteRejection::ReasonRequired);
        }
        record.deleted = true;
        self.publish(StoreChange::Deleted(id));
        Ok(())
    }

    /// Clear the tombstone, unconditionally.
    pub fn restore(&mut self, id: Uuid) {
        if let Some(record) = self.records.iter_mut().find(|a| a.id == id) {
            record.deleted = false;
            self.publish(StoreChange::Restored(id));
        }
    }

    /// Empty the set. The UI gates this behind an explicit confirmation.
    pub fn clear_all(&mut self) {
        self.records.clear();
        self.publish(StoreChange::Cleared);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// An AI detection record as `replace_all` would receive it.
    pub fn ai_record(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Anomaly {
        Anomaly {
            id: Uuid::new_v4(),
            x,
            y,
            w,
            h,
            confidence: Some(confidence),
            severity: Some(Severity::Faulty),
            classification: Some("Loose Joint".to_string()),
            comment: String::new(),
            source: Source::Ai,
            deleted: false,
            user_id: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ai_record;
    use super::*;
    use egui::vec2;

    fn user_box(store: &mut AnnotationStore, x: f32, y: f32, w: f32, h: f32) -> Uuid {
        store.add_user_box(Rect::from_min_size(pos2(x, y), vec2(w, h)))
    }

    #[test]
    fn add_user_box_starts_unclassified_and_live() {
        let mut store = AnnotationStore::new();
        let id = user_box(&mut store, 100.0, 100.0, 50.0, 60.0);
        let a = store.get(id).unwrap();
        assert_eq!(a.source, Source::User);
        assert_eq!((a.x, a.y, a.w, a.h), (100.0, 100.0, 50.0, 60.0));
        assert!(a.severity.is_none() && a.classification.is_none());
        assert!(a.confidence.is_none());
        assert!(!a.deleted);
    }

    #[test]
    fn severity_edit_is_refused_on_ai_records() {
        let mut store = AnnotationStore::new();
        store.replace_all(vec![ai_record(10.0, 10.0, 40.0, 40.0, 0.9)]);
        let id = store.all()[0].id;
        let before = store.get(id).unwrap().clone();

        let err = store.edit(id, AnomalyPatch::severity(Some(Severity::Normal)));
        assert_eq!(err, Err(EditRejection::AiProvenance));
        let err = store.edit(id, AnomalyPatch::classification(Some("Other".into())));
        assert_eq!(err, Err(EditRejection::AiProvenance));
        assert_eq!(store.get(id).unwrap(), &before, "rejected patch must not apply");

        // Comments stay editable on AI records.
        store.edit(id, AnomalyPatch::comment("checked on site")).unwrap();
        assert_eq!(store.get(id).unwrap().comment, "checked on site");
    }

    #[test]
    fn user_records_accept_severity_and_classification() {
        let mut store = AnnotationStore::new();
        let id = user_box(&mut store, 0.0, 0.0, 20.0, 20.0);
        store
            .edit(id, AnomalyPatch::severity(Some(Severity::PotentiallyFaulty)))
            .unwrap();
        store
            .edit(id, AnomalyPatch::classification(Some("Point Overload".into())))
            .unwrap();
        let a = store.get(id).unwrap();
        assert_eq!(a.severity, Some(Severity::PotentiallyFaulty));
        assert_eq!(a.classification.as_deref(), Some("Point Overload"));
    }

    #[test]
    fn ai_delete_requires_reason_then_succeeds() {
        let mut store = AnnotationStore::new();
        store.replace_all(vec![ai_record(10.0, 10.0, 40.0, 40.0, 0.8)]);
        let id = store.all()[0].id;

        assert_eq!(store.soft_delete(id), Err(DeleteRejection::ReasonRequired));
        assert!(!store.get(id).unwrap().deleted, "refusal leaves the store unchanged");

        // Whitespace is not a reason.
        store.edit(id, AnomalyPatch::comment("   ")).unwrap();
        assert_eq!(store.soft_delete(id), Err(DeleteRejection::ReasonRequired));

        store.edit(id, AnomalyPatch::comment("false positive")).unwrap();
        assert_eq!(store.soft_delete(id), Ok(()));
        assert!(store.get(id).unwrap().deleted);
    }

    #[test]
    fn user_delete_is_unconditional_and_restore_reverses_it() {
        let mut store = AnnotationStore::new();
        let id = user_box(&mut store, 0.0, 0.0, 30.0, 30.0);
        store.soft_delete(id).unwrap();
        assert!(store.get(id).unwrap().deleted);
        assert_eq!(store.visible().count(), 0);
        assert_eq!(store.tombstoned().count(), 1);

        store.restore(id);
        assert!(!store.get(id).unwrap().deleted);
        assert_eq!(store.visible().count(), 1);
    }

    #[test]
    fn replace_all_discards_user_boxes_too() {
        let mut store = AnnotationStore::new();
        user_box(&mut store, 0.0, 0.0, 30.0, 30.0);
        user_box(&mut store, 50.0, 50.0, 30.0, 30.0);

        store.replace_all(vec![
            ai_record(1.0, 1.0, 20.0, 20.0, 0.7),
            ai_record(2.0, 2.0, 20.0, 20.0, 0.8),
            ai_record(3.0, 3.0, 20.0, 20.0, 0.9),
        ]);
        assert_eq!(store.len(), 3);
        assert!(store.all().iter().all(|a| a.source == Source::Ai));
    }

    #[test]
    fn visible_preserves_insertion_order() {
        let mut store = AnnotationStore::new();
        let a = user_box(&mut store, 0.0, 0.0, 20.0, 20.0);
        let b = user_box(&mut store, 1.0, 1.0, 20.0, 20.0);
        let c = user_box(&mut store, 2.0, 2.0, 20.0, 20.0);
        store.soft_delete(b).unwrap();
        let order: Vec<Uuid> = store.visible().map(|r| r.id).collect();
        assert_eq!(order, vec![a, c]);
    }

    #[test]
    fn unknown_ids_are_defensive_noops() {
        let mut store = AnnotationStore::new();
        let ghost = Uuid::new_v4();
        assert_eq!(store.edit(ghost, AnomalyPatch::comment("x")), Err(EditRejection::UnknownId));
        assert_eq!(store.soft_delete(ghost), Err(DeleteRejection::UnknownId));
        store.restore(ghost);
        store.update_geometry(ghost, Rect::from_min_size(pos2(0.0, 0.0), vec2(10.0, 10.0)));
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn every_mutation_notifies_subscribers() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let mut store = AnnotationStore::new();
        let seen: Rc<RefCell<Vec<StoreChange>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(Box::new(move |c| sink.borrow_mut().push(*c)));

        let id = store.add_user_box(Rect::from_min_size(pos2(0.0, 0.0), vec2(20.0, 20.0)));
        store.edit(id, AnomalyPatch::comment("note")).unwrap();
        store.soft_delete(id).unwrap();
        store.restore(id);
        store.clear_all();

        let seen = seen.borrow();
        assert_eq!(
            *seen,
            vec![
                StoreChange::Added(id),
                StoreChange::Edited(id),
                StoreChange::Deleted(id),
                StoreChange::Restored(id),
                StoreChange::Cleared,
            ]
        );
    }
}
