#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub fn temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("create temp dir")
}

/// A running `tutord` with its pipes. Killed on drop.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_tutord");
    let mut child = Command::new(exe)
        .env_remove("TUTORD_WORKSPACE")
        .env("TUTORD_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tutord");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    /// Full response envelope.
    pub fn request(
        &mut self,
        actor: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(a) = actor {
            payload["actor"] = json!(a);
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(
        &mut self,
        actor: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let value = self.request(actor, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(serde_json::Value::Null)
    }

    /// Returns the error code, failing the test on success.
    pub fn request_err(
        &mut self,
        actor: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> String {
        let value = self.request(actor, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }

    pub fn select_workspace(&mut self, path: &Path) {
        self.request_ok(
            None,
            "workspace.select",
            json!({ "path": path.to_string_lossy() }),
        );
    }
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

#[derive(Debug, Clone)]
pub struct Person {
    pub user_id: String,
    pub profile_id: String,
}

static PHONE_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1000);

pub fn create_user(
    sc: &mut Sidecar,
    actor: Option<&str>,
    role: &str,
    first: &str,
    last: &str,
    extra: serde_json::Value,
) -> Person {
    let n = PHONE_SEQ.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let mut params = json!({
        "role": role,
        "phone": format!("+99890{:07}", n),
        "password": "secret123",
        "firstName": first,
        "lastName": last,
    });
    if let (Some(p), Some(e)) = (params.as_object_mut(), extra.as_object()) {
        for (k, v) in e {
            p.insert(k.clone(), v.clone());
        }
    }
    let created = sc.request_ok(actor, "users.create", params);
    Person {
        user_id: str_field(&created, "userId"),
        profile_id: str_field(&created, "profileId"),
    }
}

/// Admin, one teacher, one subject with a single section/block/topic.
pub struct School {
    pub admin: String,
    pub teacher: Person,
    pub subject_id: String,
    pub section_id: String,
    pub block_id: String,
    pub topic_id: String,
}

pub fn seed_school(sc: &mut Sidecar) -> School {
    let admin = create_user(sc, None, "admin", "Ada", "Admin", json!({})).user_id;
    let subject = sc.request_ok(Some(&admin), "subjects.create", json!({ "name": "Mathematics" }));
    let subject_id = str_field(&subject, "subjectId");
    let teacher = create_user(
        sc,
        Some(&admin),
        "teacher",
        "Timur",
        "Karimov",
        json!({ "subjectId": subject_id }),
    );
    let section = sc.request_ok(
        Some(&admin),
        "sections.create",
        json!({ "subjectId": subject_id, "title": "Algebra" }),
    );
    let section_id = str_field(&section, "sectionId");
    let block = sc.request_ok(
        Some(&admin),
        "blocks.create",
        json!({ "sectionId": section_id, "title": "Equations" }),
    );
    let block_id = str_field(&block, "blockId");
    let topic = sc.request_ok(
        Some(&admin),
        "topics.create",
        json!({ "blockId": block_id, "title": "Linear equations" }),
    );
    let topic_id = str_field(&topic, "topicId");
    School {
        admin,
        teacher,
        subject_id,
        section_id,
        block_id,
        topic_id,
    }
}

pub fn add_student(sc: &mut Sidecar, admin: &str, first: &str, last: &str, group: &str) -> Person {
    create_user(
        sc,
        Some(admin),
        "student",
        first,
        last,
        json!({ "groupName": group }),
    )
}
