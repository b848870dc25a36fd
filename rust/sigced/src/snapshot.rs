use crate::calc::{CalcError, CourseSnapshot, CriterionDef, Level, UnitDef};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    pub level: Level,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub id: String,
    pub group_id: String,
    pub subject_name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
}

pub fn load_group(conn: &Connection, group_id: &str) -> Result<GroupInfo, CalcError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT name, level FROM groups WHERE id = ?",
            [group_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some((name, level)) = row else {
        return Err(CalcError::new("not_found", "group not found")
            .with_details(json!({ "groupId": group_id })));
    };
    Ok(GroupInfo {
        id: group_id.to_string(),
        name,
        level: Level::from_db(&level),
    })
}

pub fn load_course(conn: &Connection, course_id: &str) -> Result<CourseInfo, CalcError> {
    conn.query_row(
        "SELECT group_id, subject_name, sort_order FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(CourseInfo {
                id: course_id.to_string(),
                group_id: r.get(0)?,
                subject_name: r.get(1)?,
                sort_order: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(CalcError::db)?
    .ok_or_else(|| {
        CalcError::new("not_found", "course not found").with_details(json!({ "courseId": course_id }))
    })
}

pub fn load_group_courses(conn: &Connection, group_id: &str) -> Result<Vec<CourseInfo>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, subject_name, sort_order
             FROM courses
             WHERE group_id = ?
             ORDER BY sort_order, subject_name",
        )
        .map_err(CalcError::db)?;
    let courses = stmt
        .query_map([group_id], |r| {
            Ok(CourseInfo {
                id: r.get(0)?,
                group_id: group_id.to_string(),
                subject_name: r.get(1)?,
                sort_order: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    Ok(courses)
}

pub fn load_group_students(conn: &Connection, group_id: &str) -> Result<Vec<StudentInfo>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, sort_order, active
             FROM students
             WHERE group_id = ?
             ORDER BY sort_order",
        )
        .map_err(CalcError::db)?;
    let students = stmt
        .query_map([group_id], student_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    Ok(students)
}

pub fn load_student(
    conn: &Connection,
    group_id: &str,
    student_id: &str,
) -> Result<StudentInfo, CalcError> {
    conn.query_row(
        "SELECT id, last_name, first_name, sort_order, active
         FROM students
         WHERE id = ? AND group_id = ?",
        (student_id, group_id),
        student_row,
    )
    .optional()
    .map_err(CalcError::db)?
    .ok_or_else(|| {
        CalcError::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id, "groupId": group_id }))
    })
}

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentInfo> {
    let last: String = r.get(1)?;
    let first: String = r.get(2)?;
    Ok(StudentInfo {
        id: r.get(0)?,
        display_name: format!("{}, {}", last, first),
        sort_order: r.get(3)?,
        active: r.get::<_, i64>(4)? != 0,
    })
}

/// Reads the course's catalog, grades and recovery grades into the typed
/// shape the rollup consumes. NULL grade values are left out (ungraded).
pub fn load_course_snapshot(conn: &Connection, course_id: &str) -> Result<CourseSnapshot, CalcError> {
    let course = load_course(conn, course_id)?;
    let group = load_group(conn, &course.group_id)?;
    load_snapshot_for(conn, &course, group.level)
}

/// Same as [`load_course_snapshot`] for callers that already hold the course
/// row and its group's level.
pub fn load_snapshot_for(
    conn: &Connection,
    course: &CourseInfo,
    level: Level,
) -> Result<CourseSnapshot, CalcError> {
    let course_id = course.id.as_str();
    let competency_labels = level.competency_labels();

    let mut units_stmt = conn
        .prepare(
            "SELECT id, period, name, sort_order
             FROM units
             WHERE course_id = ?
             ORDER BY period, sort_order, name",
        )
        .map_err(CalcError::db)?;
    let unit_rows: Vec<(String, Value, String, i64)> = units_stmt
        .query_map([course_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    let units: Vec<UnitDef> = unit_rows
        .into_iter()
        .map(|(id, raw_period, name, sort_order)| {
            let period = period_value(&raw_period).unwrap_or_else(|| {
                warn!(course_id, unit_id = %id, period = ?raw_period, "unit period is not an integer");
                UNMATCHED_PERIOD
            });
            UnitDef {
                id,
                course_id: course_id.to_string(),
                period,
                name,
                sort_order,
            }
        })
        .collect();

    let mut criteria_stmt = conn
        .prepare(
            "SELECT c.id, c.unit_id, c.idx, c.description, c.max_value, c.competency
             FROM criteria c
             JOIN units u ON u.id = c.unit_id
             WHERE u.course_id = ?
             ORDER BY u.period, u.sort_order, c.idx",
        )
        .map_err(CalcError::db)?;
    let criteria: Vec<CriterionDef> = criteria_stmt
        .query_map([course_id], |r| {
            let competency: Option<String> = r.get(5)?;
            Ok(CriterionDef {
                id: r.get(0)?,
                unit_id: r.get(1)?,
                idx: r.get(2)?,
                description: r.get(3)?,
                max_value: score_value(&r.get::<_, Value>(4)?).unwrap_or(0.0),
                competency: competency
                    .map(|s| s.trim().to_ascii_uppercase())
                    .filter(|s| !s.is_empty()),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;

    for c in &criteria {
        if let Some(label) = c.competency.as_deref() {
            if !competency_labels.iter().any(|l| l == label) {
                warn!(
                    course_id,
                    criterion_id = %c.id,
                    competency = label,
                    level = ?level,
                    "criterion competency is outside the course level's set"
                );
            }
        }
    }

    let mut grades_stmt = conn
        .prepare(
            "SELECT g.student_id, g.unit_id, g.criterion_id, g.value
             FROM grades g
             JOIN units u ON u.id = g.unit_id
             WHERE u.course_id = ? AND g.value IS NOT NULL",
        )
        .map_err(CalcError::db)?;
    let grade_rows: Vec<(String, String, String, Value)> = grades_stmt
        .query_map([course_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    let mut grades: HashMap<(String, String, String), f64> = HashMap::new();
    for (student_id, unit_id, criterion_id, raw) in grade_rows {
        match score_value(&raw) {
            Some(value) => {
                grades.insert((student_id, unit_id, criterion_id), value);
            }
            None => warn!(
                course_id,
                student_id = %student_id,
                criterion_id = %criterion_id,
                value = ?raw,
                "grade is not numeric, treating as ungraded"
            ),
        }
    }

    let mut recovery_stmt = conn
        .prepare(
            "SELECT student_id, period, competency, value
             FROM recovery_grades
             WHERE course_id = ? AND value IS NOT NULL",
        )
        .map_err(CalcError::db)?;
    let recovery_rows: Vec<(String, Value, String, Value)> = recovery_stmt
        .query_map([course_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    let mut recovery_grades: HashMap<(String, i64, String), f64> = HashMap::new();
    for (student_id, raw_period, competency, raw_value) in recovery_rows {
        let (Some(period), Some(value)) = (period_value(&raw_period), score_value(&raw_value)) else {
            warn!(
                course_id,
                student_id = %student_id,
                period = ?raw_period,
                value = ?raw_value,
                "skipping unreadable recovery grade"
            );
            continue;
        };
        recovery_grades.insert(
            (student_id, period, competency.trim().to_ascii_uppercase()),
            value,
        );
    }

    debug!(
        course_id,
        units = units.len(),
        criteria = criteria.len(),
        grades = grades.len(),
        recovery_grades = recovery_grades.len(),
        "loaded course snapshot"
    );

    Ok(CourseSnapshot {
        course_id: course_id.to_string(),
        competency_labels,
        units,
        criteria,
        grades,
        recovery_grades,
    })
}

/// Period assigned to units whose stored period is not a whole number; it
/// never matches a period query.
const UNMATCHED_PERIOD: i64 = 0;

fn period_value(raw: &Value) -> Option<i64> {
    match raw {
        Value::Integer(i) => Some(*i),
        Value::Real(f) if f.fract() == 0.0 => Some(*f as i64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric cell as a score. Text is accepted with either decimal separator
/// ("8.5" or "8,5"); blanks and anything else read as absent.
fn score_value(raw: &Value) -> Option<f64> {
    let v = match raw {
        Value::Integer(i) => *i as f64,
        Value::Real(f) => *f,
        Value::Text(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Observations keyed by period label ("1", "2", "3", "Anual").
pub fn load_comments(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<Vec<(String, String)>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT period, body
             FROM comments
             WHERE student_id = ? AND course_id = ?
             ORDER BY CASE period WHEN '1' THEN 1 WHEN '2' THEN 2 WHEN '3' THEN 3 ELSE 4 END",
        )
        .map_err(CalcError::db)?;
    let comments = stmt
        .query_map((student_id, course_id), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    Ok(comments)
}
