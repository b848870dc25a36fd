use crate::calc::{self, AggregationMode, CourseSnapshot, RollupEngine};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{db_conn, required_str, resolve_mode};
use crate::ipc::types::{AppState, Request};
use crate::snapshot;
use serde_json::json;

struct RollupRequest {
    snapshot: CourseSnapshot,
    mode: AggregationMode,
    student_id: String,
}

impl RollupRequest {
    fn engine(&self) -> RollupEngine<'_> {
        RollupEngine::new(&self.snapshot, self.mode)
    }
}

fn rollup_request(state: &AppState, req: &Request) -> Result<RollupRequest, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let course_id = required_str(req, "courseId")?;
    let student_id = required_str(req, "studentId")?;
    let mode = resolve_mode(state, conn, req)?;
    let snapshot =
        snapshot::load_course_snapshot(conn, &course_id).map_err(|e| calc_err(&req.id, e))?;
    Ok(RollupRequest {
        snapshot,
        mode,
        student_id,
    })
}

fn required_unit(rr: &RollupRequest, req: &Request) -> Result<String, serde_json::Value> {
    let unit_id = required_str(req, "unitId")?;
    if rr.snapshot.unit(&unit_id).is_none() {
        return Err(err(
            &req.id,
            "not_found",
            "unit not found in course",
            Some(json!({ "unitId": unit_id, "courseId": rr.snapshot.course_id })),
        ));
    }
    Ok(unit_id)
}

fn handle_unit_total(state: &mut AppState, req: &Request) -> serde_json::Value {
    let rr = match rollup_request(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let unit_id = match required_unit(&rr, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total = rr.engine().unit_total(&rr.student_id, &unit_id);
    ok(&req.id, json!({ "total": total, "mode": rr.mode }))
}

fn handle_unit_competency_subtotals(state: &mut AppState, req: &Request) -> serde_json::Value {
    let rr = match rollup_request(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let unit_id = match required_unit(&rr, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subtotals = rr.engine().unit_competency_subtotals(&rr.student_id, &unit_id);
    ok(&req.id, json!({ "subtotals": subtotals, "mode": rr.mode }))
}

/// Whole numbers only; `2.0` from a JS client is accepted as `2`.
fn period_param(v: &serde_json::Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn handle_period_competency_averages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let period = match req.params.get("period").and_then(period_param) {
        Some(p) if calc::is_aggregation_period(p) => p,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "period must be 1, 2 or 3",
                req.params.get("period").map(|p| json!({ "period": p })),
            )
        }
    };
    let rr = match rollup_request(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let averages = rr.engine().period_competency_averages(&rr.student_id, period);
    ok(
        &req.id,
        json!({ "period": period, "averages": averages, "mode": rr.mode }),
    )
}

fn handle_final_competency_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let rr = match rollup_request(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let label = match required_str(req, "competency") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(e) => return e,
    };
    if !rr.snapshot.has_label(&label) {
        return err(
            &req.id,
            "bad_params",
            "competency is not part of this course's level",
            Some(json!({
                "competency": label,
                "allowed": rr.snapshot.competency_labels,
            })),
        );
    }
    let grade = rr.engine().final_competency_grade(&rr.student_id, &label);
    ok(
        &req.id,
        json!({ "competency": label, "grade": grade, "mode": rr.mode }),
    )
}

fn handle_final_course_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let rr = match rollup_request(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = rr.engine().final_course_grade(&rr.student_id);
    ok(&req.id, json!({ "grade": grade, "mode": rr.mode }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rollup.unitTotal" => Some(handle_unit_total(state, req)),
        "rollup.unitCompetencySubtotals" => Some(handle_unit_competency_subtotals(state, req)),
        "rollup.periodCompetencyAverages" => Some(handle_period_competency_averages(state, req)),
        "rollup.finalCompetencyGrade" => Some(handle_final_competency_grade(state, req)),
        "rollup.finalCourseGrade" => Some(handle_final_course_grade(state, req)),
        _ => None,
    }
}
