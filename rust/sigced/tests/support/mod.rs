#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    pub child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl Sidecar {
    pub fn spawn() -> Self {
        Self::spawn_with_env(&[])
    }

    pub fn spawn_with_env(env: &[(&str, &str)]) -> Self {
        let exe = env!("CARGO_BIN_EXE_sigced");
        let mut cmd = Command::new(exe);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env_remove("SIGCE_WORKSPACE")
            .env_remove("SIGCE_AGGREGATION_MODE");
        for (k, v) in env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().expect("spawn sigced");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
        }
    }

    pub fn send_line(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_line(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        value
    }

    pub fn request_ok(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(id, method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    pub fn request_err_code(&mut self, id: &str, method: &str, params: serde_json::Value) -> String {
        let value = self.request(id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }

    pub fn select_workspace(&mut self, workspace: &Path) {
        let _ = self.request_ok(
            "ws",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn open_workspace_db(workspace: &Path) -> Connection {
    Connection::open(workspace.join("sigce.sqlite3")).expect("open workspace db")
}

/// Secondary group "3A" with one course ("bio") and two students. Period 1
/// has two units: u1 (C1 criteria graded 8 and 6) and u2 (C1 criterion
/// left ungraded). Period 2 has u3 with a C2 criterion graded 9.
pub fn seed_course(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO groups(id, name, level) VALUES('g3a', '3A', 'secondary');
         INSERT INTO courses(id, group_id, subject_name, sort_order) VALUES('bio', 'g3a', 'Biology', 0);
         INSERT INTO students(id, group_id, last_name, first_name, sort_order, active)
             VALUES('st1', 'g3a', 'Garcia', 'Lucia', 1, 1);
         INSERT INTO students(id, group_id, last_name, first_name, sort_order, active)
             VALUES('st2', 'g3a', 'Moreno', 'Pablo', 2, 1);
         INSERT INTO units(id, course_id, period, name, sort_order) VALUES('u1', 'bio', 1, 'Unit 1', 0);
         INSERT INTO units(id, course_id, period, name, sort_order) VALUES('u2', 'bio', 1, 'Unit 2', 1);
         INSERT INTO units(id, course_id, period, name, sort_order) VALUES('u3', 'bio', 2, 'Unit 3', 0);
         INSERT INTO criteria(id, unit_id, idx, description, max_value, competency)
             VALUES('k1', 'u1', 0, 'Cells', 10, 'C1');
         INSERT INTO criteria(id, unit_id, idx, description, max_value, competency)
             VALUES('k2', 'u1', 1, 'Tissues', 10, 'C1');
         INSERT INTO criteria(id, unit_id, idx, description, max_value, competency)
             VALUES('k3', 'u2', 0, 'Organs', 10, 'C1');
         INSERT INTO criteria(id, unit_id, idx, description, max_value, competency)
             VALUES('k4', 'u3', 0, 'Ecosystems', 10, 'C2');
         INSERT INTO grades(student_id, unit_id, criterion_id, value) VALUES('st1', 'u1', 'k1', 8);
         INSERT INTO grades(student_id, unit_id, criterion_id, value) VALUES('st1', 'u1', 'k2', 6);
         INSERT INTO grades(student_id, unit_id, criterion_id, value) VALUES('st1', 'u2', 'k3', NULL);
         INSERT INTO grades(student_id, unit_id, criterion_id, value) VALUES('st1', 'u3', 'k4', 9);",
    )
    .expect("seed course");
}
