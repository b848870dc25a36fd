use crate::calc::{
    round_for_display, AggregationMode, CalcError, CourseSnapshot, CriterionDef, RollupEngine,
    UnitDef, AGGREGATION_PERIODS,
};
use crate::snapshot::{self, CourseInfo, GroupInfo, StudentInfo};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

/// A rollup value next to its rounded twin for printing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Graded {
    pub value: f64,
    pub display: f64,
}

impl Graded {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            display: round_for_display(value),
        }
    }
}

fn graded_map(raw: BTreeMap<String, f64>) -> BTreeMap<String, Graded> {
    raw.into_iter().map(|(k, v)| (k, Graded::new(v))).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitResult {
    pub unit_id: String,
    pub total: Graded,
    pub subtotals: BTreeMap<String, Graded>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodResult {
    pub period: i64,
    pub averages: BTreeMap<String, Graded>,
    /// Only labels with a recorded recovery grade appear here.
    pub recovery: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRollup {
    pub student: StudentInfo,
    pub units: Vec<UnitResult>,
    pub periods: Vec<PeriodResult>,
    pub final_competencies: BTreeMap<String, Graded>,
    pub final_grade: Graded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGradebookModel {
    pub course: CourseInfo,
    pub group: GroupInfo,
    pub mode: AggregationMode,
    pub competency_labels: Vec<String>,
    pub units: Vec<UnitDef>,
    pub criteria: Vec<CriterionDef>,
    pub rows: Vec<StudentRollup>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEntry {
    pub period: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSection {
    pub course: CourseInfo,
    pub competency_labels: Vec<String>,
    pub periods: Vec<PeriodResult>,
    pub final_competencies: BTreeMap<String, Graded>,
    pub final_grade: Graded,
    pub comments: Vec<CommentEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReportCardModel {
    pub group: GroupInfo,
    pub student: StudentInfo,
    pub mode: AggregationMode,
    pub generated_at: String,
    pub courses: Vec<CourseSection>,
}

fn period_results(engine: &RollupEngine<'_>, student_id: &str) -> Vec<PeriodResult> {
    let snapshot = engine.snapshot();
    AGGREGATION_PERIODS
        .iter()
        .map(|p| {
            let recovery = snapshot
                .competency_labels
                .iter()
                .filter_map(|l| {
                    snapshot
                        .recovery_grade(student_id, *p, l)
                        .map(|v| (l.clone(), v))
                })
                .collect();
            PeriodResult {
                period: *p,
                averages: graded_map(engine.period_competency_averages(student_id, *p)),
                recovery,
            }
        })
        .collect()
}

pub fn student_rollup(engine: &RollupEngine<'_>, student: &StudentInfo) -> StudentRollup {
    let units = engine
        .snapshot()
        .units
        .iter()
        .map(|u| UnitResult {
            unit_id: u.id.clone(),
            total: Graded::new(engine.unit_total(&student.id, &u.id)),
            subtotals: graded_map(engine.unit_competency_subtotals(&student.id, &u.id)),
        })
        .collect();
    StudentRollup {
        student: student.clone(),
        units,
        periods: period_results(engine, &student.id),
        final_competencies: graded_map(engine.final_competency_grades(&student.id)),
        final_grade: Graded::new(engine.final_course_grade(&student.id)),
    }
}

pub fn course_gradebook_model(
    conn: &Connection,
    course_id: &str,
    mode: AggregationMode,
) -> Result<CourseGradebookModel, CalcError> {
    let course = snapshot::load_course(conn, course_id)?;
    let group = snapshot::load_group(conn, &course.group_id)?;
    let students = snapshot::load_group_students(conn, &course.group_id)?;
    let snap: CourseSnapshot = snapshot::load_snapshot_for(conn, &course, group.level)?;
    let engine = RollupEngine::new(&snap, mode);

    let rows = students
        .iter()
        .filter(|s| s.active)
        .map(|s| student_rollup(&engine, s))
        .collect();

    Ok(CourseGradebookModel {
        course,
        group,
        mode,
        competency_labels: snap.competency_labels.clone(),
        units: snap.units.clone(),
        criteria: snap.criteria.clone(),
        rows,
    })
}

pub fn student_report_card_model(
    conn: &Connection,
    group_id: &str,
    student_id: &str,
    mode: AggregationMode,
) -> Result<StudentReportCardModel, CalcError> {
    let group = snapshot::load_group(conn, group_id)?;
    let student = snapshot::load_student(conn, group_id, student_id)?;
    let courses = snapshot::load_group_courses(conn, group_id)?;

    let mut sections = Vec::with_capacity(courses.len());
    for course in courses {
        let snap = snapshot::load_snapshot_for(conn, &course, group.level)?;
        let engine = RollupEngine::new(&snap, mode);
        let comments = snapshot::load_comments(conn, student_id, &course.id)?
            .into_iter()
            .map(|(period, body)| CommentEntry { period, body })
            .collect();
        sections.push(CourseSection {
            competency_labels: snap.competency_labels.clone(),
            periods: period_results(&engine, student_id),
            final_competencies: graded_map(engine.final_competency_grades(student_id)),
            final_grade: Graded::new(engine.final_course_grade(student_id)),
            comments,
            course,
        });
    }

    Ok(StudentReportCardModel {
        group,
        student,
        mode,
        generated_at: chrono::Utc::now().to_rfc3339(),
        courses: sections,
    })
}
