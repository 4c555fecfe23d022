use notenbuchd::model::{
    AssessmentKind, CategoryKind, HalfYear, LearningGroup, OverrideTarget, Student,
};
use notenbuchd::service::{AssessmentPatch, NewAssessment, NewCategory, NewSubItem, NewTask};
use notenbuchd::threshold::ThresholdRowInput;
use notenbuchd::{
    GradebookService, GroupContext, MemoryStore, NoteLevel, RecalcEngine, SqliteStore,
};

fn group(scale_id: &str) -> LearningGroup {
    LearningGroup {
        id: "10b-mathe".to_string(),
        scale_id: scale_id.to_string(),
        half_year_1_weight: 1.0,
        half_year_2_weight: 1.0,
    }
}

fn roster() -> Vec<Student> {
    vec![Student::new("anna"), Student::new("ben"), Student::new("cem")]
}

fn open_service(scale_id: &str) -> GradebookService {
    let mut svc = GradebookService::open(Box::new(MemoryStore::new())).expect("open service");
    svc.select_group(Some(GroupContext {
        group: group(scale_id),
        students: roster(),
    }));
    svc
}

fn category(
    svc: &mut GradebookService,
    half_year: HalfYear,
    kind: CategoryKind,
    weight: f64,
) -> String {
    svc.create_category(NewCategory {
        group_id: "10b-mathe".to_string(),
        half_year,
        kind,
        weight,
        name: None,
    })
    .expect("create category")
    .id
}

fn assessment(
    svc: &mut GradebookService,
    category_id: &str,
    kind: AssessmentKind,
    weight: f64,
) -> String {
    svc.create_assessment(NewAssessment {
        category_id: category_id.to_string(),
        name: "Leistung".to_string(),
        weight,
        kind,
    })
    .expect("create assessment")
    .id
}

fn sub_item(svc: &mut GradebookService, assessment_id: &str, weight: f64) -> String {
    svc.create_sub_item(NewSubItem {
        assessment_id: assessment_id.to_string(),
        name: "Teilnote".to_string(),
        weight,
    })
    .expect("create sub item")
    .id
}

fn task(svc: &mut GradebookService, assessment_id: &str, max_points: f64) -> String {
    svc.create_task(NewTask {
        assessment_id: assessment_id.to_string(),
        name: "Aufgabe".to_string(),
        max_points,
    })
    .expect("create task")
    .id
}

#[test]
fn exam_on_points_scale_resolves_through_default_table() {
    let mut svc = open_service("punkte_15_0");
    let cat = category(&mut svc, HalfYear::First, CategoryKind::Written, 1.0);
    let exam = assessment(&mut svc, &cat, AssessmentKind::Exam, 1.0);
    let t1 = task(&mut svc, &exam, 10.0);
    let t2 = task(&mut svc, &exam, 20.0);
    svc.save_points(&t1, "anna", Some(8.5)).expect("points");
    svc.save_points(&t2, "anna", Some(17.0)).expect("points");

    let note = svc
        .engine()
        .note(NoteLevel::Assessment, "anna", &exam)
        .expect("exam note");
    assert_eq!(note.final_grade, "13");
    let figures = note.exam.expect("exam figures");
    assert!((figures.total_points - 25.5).abs() < 1e-9);
    assert!((figures.max_points - 30.0).abs() < 1e-9);
    assert!((figures.percent - 85.0).abs() < 1e-9);
    assert_eq!(note.display_decimal, "13,00 P.");

    // Only anna took part.
    assert!(svc.engine().note(NoteLevel::Assessment, "ben", &exam).is_none());

    let overall = svc
        .engine()
        .note(NoteLevel::Overall, "anna", "overall")
        .expect("overall");
    assert_eq!(overall.final_grade, "13");
}

#[test]
fn collection_on_tendency_scale_rounds_label_but_keeps_average() {
    let mut svc = open_service("noten_1_6");
    let cat = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
    let coll = assessment(&mut svc, &cat, AssessmentKind::Collection, 1.0);
    let light = sub_item(&mut svc, &coll, 1.0);
    let heavy = sub_item(&mut svc, &coll, 2.0);
    svc.save_grade(&light, "ben", Some("2+"), None).expect("grade");
    svc.save_grade(&heavy, "ben", Some("3"), Some("Referat".into()))
        .expect("grade");

    let note = svc
        .engine()
        .note(NoteLevel::Assessment, "ben", &coll)
        .expect("collection note");
    assert_eq!(note.final_grade, "3+");
    assert!((note.average_points - 28.0 / 3.0).abs() < 1e-9);
    assert_eq!(note.display_decimal, "2,56");

    let hy1 = svc
        .engine()
        .note(NoteLevel::HalfYear, "ben", "hy1-avg")
        .expect("half-year");
    assert!((hy1.average_points - 28.0 / 3.0).abs() < 1e-9);
}

#[test]
fn assessment_threshold_override_beats_global_table() {
    let mut svc = open_service("punkte_15_0");
    let cat = category(&mut svc, HalfYear::First, CategoryKind::Written, 1.0);
    let exam = assessment(&mut svc, &cat, AssessmentKind::Exam, 1.0);
    let t = task(&mut svc, &exam, 10.0);
    svc.save_points(&t, "cem", Some(7.0)).expect("points");
    assert_eq!(
        svc.engine()
            .note(NoteLevel::Assessment, "cem", &exam)
            .expect("note")
            .final_grade,
        "10"
    );

    let rows = vec![
        ThresholdRowInput {
            points: 11,
            percent_from: Some(70.0),
        },
        ThresholdRowInput {
            points: 5,
            percent_from: Some(40.0),
        },
        ThresholdRowInput {
            points: 0,
            percent_from: Some(0.0),
        },
    ];
    svc.set_assessment_thresholds(&exam, Some(&rows)).expect("override table");
    assert_eq!(
        svc.engine()
            .note(NoteLevel::Assessment, "cem", &exam)
            .expect("note")
            .final_grade,
        "11"
    );

    svc.set_assessment_thresholds(&exam, None).expect("drop table");
    assert_eq!(
        svc.engine()
            .note(NoteLevel::Assessment, "cem", &exam)
            .expect("note")
            .final_grade,
        "10"
    );
}

#[test]
fn half_year_override_short_circuits_and_reverts() {
    let mut svc = open_service("noten_1_6");
    let cat = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
    let coll = assessment(&mut svc, &cat, AssessmentKind::Collection, 1.0);
    let item = sub_item(&mut svc, &coll, 1.0);
    svc.save_grade(&item, "anna", Some("4"), None).expect("grade");

    svc.set_manual_override("anna", OverrideTarget::HalfYear1, "2")
        .expect("override");
    let hy1 = svc
        .engine()
        .note(NoteLevel::HalfYear, "anna", "hy1-avg")
        .expect("hy1");
    assert!(hy1.is_manual);
    assert_eq!(hy1.final_grade, "2");
    assert!((hy1.average_points - 11.0).abs() < 1e-9);
    // Category level still shows the computed value.
    let cat_note = svc
        .engine()
        .note(NoteLevel::Category, "anna", "hy1-oral-avg")
        .expect("category");
    assert_eq!(cat_note.final_grade, "4");
    assert!(!cat_note.is_manual);

    assert!(svc
        .delete_manual_override("anna", OverrideTarget::HalfYear1)
        .expect("delete"));
    let hy1 = svc
        .engine()
        .note(NoteLevel::HalfYear, "anna", "hy1-avg")
        .expect("hy1");
    assert!(!hy1.is_manual);
    assert_eq!(hy1.final_grade, "4");
}

#[test]
fn overall_weights_both_half_years_by_group_weights() {
    let mut svc = GradebookService::open(Box::new(MemoryStore::new())).expect("open service");
    svc.select_group(Some(GroupContext {
        group: LearningGroup {
            half_year_1_weight: 1.0,
            half_year_2_weight: 3.0,
            ..group("punkte_15_0")
        },
        students: roster(),
    }));
    let first = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
    let second = category(&mut svc, HalfYear::Second, CategoryKind::Oral, 1.0);
    let coll_1 = assessment(&mut svc, &first, AssessmentKind::Collection, 1.0);
    let coll_2 = assessment(&mut svc, &second, AssessmentKind::Collection, 1.0);
    let item_1 = sub_item(&mut svc, &coll_1, 1.0);
    let item_2 = sub_item(&mut svc, &coll_2, 1.0);
    svc.save_grade(&item_1, "anna", Some("15"), None).expect("grade");
    svc.save_grade(&item_2, "anna", Some("3"), None).expect("grade");

    let hy1 = svc.engine().note(NoteLevel::HalfYear, "anna", "hy1-avg").expect("hy1");
    let hy2 = svc.engine().note(NoteLevel::HalfYear, "anna", "hy2-avg").expect("hy2");
    assert_eq!(hy1.final_grade, "15");
    assert_eq!(hy2.final_grade, "3");

    // (15 * 1 + 3 * 3) / 4
    let overall = svc
        .engine()
        .note(NoteLevel::Overall, "anna", "overall")
        .expect("overall");
    assert!((overall.average_points - 6.0).abs() < 1e-9);
    assert_eq!(overall.final_grade, "6");
    assert_eq!(overall.display_decimal, "6,00 P.");

    // Only one half-year graded: the other weight does not dilute it.
    svc.save_grade(&item_2, "ben", Some("9"), None).expect("grade");
    let ben = svc
        .engine()
        .note(NoteLevel::Overall, "ben", "overall")
        .expect("overall");
    assert!((ben.average_points - 9.0).abs() < 1e-9);
}

#[test]
fn targeted_recalculation_matches_full_run() {
    let mut svc = open_service("noten_1_6");
    let oral = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
    let written = category(&mut svc, HalfYear::Second, CategoryKind::Written, 2.0);
    let coll = assessment(&mut svc, &oral, AssessmentKind::Collection, 1.0);
    let exam = assessment(&mut svc, &written, AssessmentKind::Exam, 1.0);
    let item = sub_item(&mut svc, &coll, 1.0);
    let t = task(&mut svc, &exam, 40.0);

    svc.save_grade(&item, "anna", Some("1-"), None).expect("grade");
    svc.save_grade(&item, "ben", Some("5"), None).expect("grade");
    svc.save_points(&t, "anna", Some(31.5)).expect("points");
    svc.save_points(&t, "cem", Some(12.0)).expect("points");
    svc.set_manual_override("cem", OverrideTarget::Overall, "4-")
        .expect("override");

    let mut fresh = RecalcEngine::new(svc.engine().style().clone());
    fresh.recalculate_all(svc.state(), &group("noten_1_6"), &roster());

    for level in [
        NoteLevel::Assessment,
        NoteLevel::Category,
        NoteLevel::HalfYear,
        NoteLevel::Overall,
    ] {
        assert_eq!(svc.notes(level), fresh.notes(level), "{:?} maps differ", level);
    }
    assert_eq!(svc.columns(), fresh.columns());
}

#[test]
fn moving_an_assessment_relayouts_columns() {
    let mut svc = open_service("punkte_15_0");
    let oral = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
    let written = category(&mut svc, HalfYear::First, CategoryKind::Written, 1.0);
    let coll = assessment(&mut svc, &oral, AssessmentKind::Collection, 1.0);
    let item = sub_item(&mut svc, &coll, 1.0);
    svc.save_grade(&item, "ben", Some("9"), None).expect("grade");
    assert!(svc.engine().note(NoteLevel::Category, "ben", "hy1-oral-avg").is_some());

    svc.update_assessment(
        &coll,
        AssessmentPatch {
            category_id: Some(written.clone()),
            ..AssessmentPatch::default()
        },
    )
    .expect("move");

    let ids: Vec<&str> = svc.columns().iter().map(|c| c.id.as_str()).collect();
    assert!(ids.contains(&"hy1-oral-empty"));
    let pos_written = ids.iter().position(|id| *id == "hy1-written-avg").expect("written avg");
    assert_eq!(ids[pos_written + 1], coll.as_str());
    assert!(svc.engine().note(NoteLevel::Category, "ben", "hy1-oral-avg").is_none());
    assert_eq!(
        svc.engine()
            .note(NoteLevel::Category, "ben", "hy1-written-avg")
            .expect("written category")
            .final_grade,
        "9"
    );
}

#[test]
fn deleting_a_category_cascades_to_entries() {
    let mut svc = open_service("punkte_15_0");
    let cat = category(&mut svc, HalfYear::Second, CategoryKind::Written, 1.0);
    let exam = assessment(&mut svc, &cat, AssessmentKind::Exam, 1.0);
    let t = task(&mut svc, &exam, 10.0);
    svc.save_points(&t, "anna", Some(10.0)).expect("points");
    svc.set_feedback(&exam, "anna", "Sauber gelöst").expect("feedback");

    svc.delete_category(&cat).expect("delete");
    let st = svc.state();
    assert!(st.assessments.is_empty());
    assert!(st.tasks.is_empty());
    assert!(st.points_entries.is_empty());
    assert!(st.feedback.is_empty());
    assert!(svc.notes(NoteLevel::Overall).is_empty());
}

#[test]
fn clearing_the_group_empties_everything() {
    let mut svc = open_service("punkte_15_0");
    let cat = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
    let coll = assessment(&mut svc, &cat, AssessmentKind::Collection, 1.0);
    let item = sub_item(&mut svc, &coll, 1.0);
    svc.save_grade(&item, "cem", Some("12"), None).expect("grade");
    assert!(!svc.notes(NoteLevel::Overall).is_empty());

    svc.select_group(None);
    assert!(svc.columns().is_empty());
    for level in [
        NoteLevel::Assessment,
        NoteLevel::Category,
        NoteLevel::HalfYear,
        NoteLevel::Overall,
    ] {
        assert!(svc.notes(level).is_empty());
    }
}

#[test]
fn state_survives_reopening_a_sqlite_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let item_id;
    {
        let store = SqliteStore::open(dir.path()).expect("open store");
        let mut svc = GradebookService::open(Box::new(store)).expect("open service");
        svc.select_group(Some(GroupContext {
            group: group("noten_1_6"),
            students: roster(),
        }));
        let cat = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
        let coll = assessment(&mut svc, &cat, AssessmentKind::Collection, 1.0);
        item_id = sub_item(&mut svc, &coll, 1.0);
        svc.save_grade(&item_id, "anna", Some("1"), None).expect("grade");
        svc.set_manual_override("ben", OverrideTarget::Overall, "2-")
            .expect("override");
    }

    let store = SqliteStore::open(dir.path()).expect("reopen store");
    let mut svc = GradebookService::open(Box::new(store)).expect("reopen service");
    assert_eq!(svc.state().grade_entries.len(), 1);
    assert_eq!(svc.state().grade_entries[0].sub_item_id, item_id);
    svc.select_group(Some(GroupContext {
        group: group("noten_1_6"),
        students: roster(),
    }));
    assert_eq!(
        svc.engine()
            .note(NoteLevel::Overall, "anna", "overall")
            .expect("anna overall")
            .final_grade,
        "1"
    );
    let ben = svc
        .engine()
        .note(NoteLevel::Overall, "ben", "overall")
        .expect("ben overall");
    assert!(ben.is_manual);
    assert_eq!(ben.final_grade, "2-");
}

#[test]
fn bulk_save_writes_once() {
    use notenbuchd::KeyValueStore;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingStore {
        inner: MemoryStore,
        grade_writes: Rc<Cell<usize>>,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
            if key == "grade_entries" {
                self.grade_writes.set(self.grade_writes.get() + 1);
            }
            self.inner.set(key, value)
        }
    }

    let grade_writes = Rc::new(Cell::new(0));
    let store = CountingStore {
        inner: MemoryStore::new(),
        grade_writes: Rc::clone(&grade_writes),
    };
    let mut svc = GradebookService::open(Box::new(store)).expect("open");
    svc.select_group(Some(GroupContext {
        group: group("punkte_15_0"),
        students: roster(),
    }));
    let cat = category(&mut svc, HalfYear::First, CategoryKind::Oral, 1.0);
    let coll = assessment(&mut svc, &cat, AssessmentKind::Collection, 1.0);
    let item = sub_item(&mut svc, &coll, 1.0);

    let saved = svc
        .bulk_save_grades(
            &item,
            &[
                ("anna".to_string(), Some("15".to_string())),
                ("ben".to_string(), Some("7".to_string())),
                ("cem".to_string(), None),
            ],
        )
        .expect("bulk");
    assert_eq!(saved, 3);
    assert_eq!(grade_writes.get(), 1);
    assert_eq!(svc.notes(NoteLevel::Assessment).len(), 2);
}
