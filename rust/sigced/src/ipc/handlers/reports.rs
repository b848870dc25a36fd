use crate::ipc::error::{calc_err, ok};
use crate::ipc::helpers::{db_conn, required_str, resolve_mode};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use serde_json::json;

fn handle_course_gradebook_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode = match resolve_mode(state, conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match reports::course_gradebook_model(conn, &course_id, mode) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_student_report_card_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode = match resolve_mode(state, conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match reports::student_report_card_model(conn, &group_id, &student_id, mode) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.courseGradebookModel" => Some(handle_course_gradebook_model(state, req)),
        "reports.studentReportCardModel" => Some(handle_student_report_card_model(state, req)),
        _ => None,
    }
}
