use crate::calc::{self, DtmCounts, ModulScores};
use crate::domain::{ExamKind, Role};
use crate::error::{insert_failed, query_failed, AppError, AppResult};
use crate::ipc::access::{ensure_can_view_student, Actor};
use crate::ipc::helpers::{
    dispatch, new_id, now_rfc3339, optional_rfc3339, optional_str, require_row, required_f64,
    required_i64, required_str, Handler,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn parse_kind(raw: &str) -> AppResult<ExamKind> {
    ExamKind::parse(raw)
        .ok_or_else(|| AppError::bad_params(format!("kind must be one of: {}", ExamKind::expected())))
}

fn scored_percent(params: &serde_json::Value) -> AppResult<(f64, f64)> {
    let score = required_f64(params, "score")?;
    let max_score = required_f64(params, "maxScore")?;
    if max_score <= 0.0 {
        return Err(AppError::bad_params("maxScore must be > 0"));
    }
    if score < 0.0 || score > max_score {
        return Err(AppError::bad_params("score must be between 0 and maxScore"));
    }
    Ok((score, max_score))
}

fn exams_record(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let kind = parse_kind(&required_str(params, "kind")?)?;
    let student_id = required_str(params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;

    let id = new_id();
    let taken_at = optional_rfc3339(params, "takenAt")?.unwrap_or_else(now_rfc3339);
    let summary = match kind {
        ExamKind::Topic => {
            let topic_id = required_str(params, "topicId")?;
            require_row(conn, "topics", &topic_id, "topic")?;
            let correct = required_i64(params, "correct")?;
            let total = required_i64(params, "total")?;
            if total <= 0 || correct < 0 || correct > total {
                return Err(AppError::bad_params("need 0 <= correct <= total and total > 0"));
            }
            conn.execute(
                "INSERT INTO topic_tests(id, student_id, topic_id, correct, total, taken_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&id, &student_id, &topic_id, correct, total, &taken_at),
            )
            .map_err(insert_failed("topic_tests"))?;
            json!({ "percent": calc::percent(correct as f64, total as f64).map(calc::round_off_1_decimal) })
        }
        ExamKind::Section | ExamKind::Block => {
            let (parent_param, parent_table, what, column) = if kind == ExamKind::Section {
                ("sectionId", "sections", "section", "section_id")
            } else {
                ("blockId", "blocks", "block", "block_id")
            };
            let parent_id = required_str(params, parent_param)?;
            require_row(conn, parent_table, &parent_id, what)?;
            let (score, max_score) = scored_percent(params)?;
            conn.execute(
                &format!(
                    "INSERT INTO {}(id, student_id, {}, score, max_score, taken_at)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    kind.table(),
                    column
                ),
                (&id, &student_id, &parent_id, score, max_score, &taken_at),
            )
            .map_err(insert_failed(kind.table()))?;
            json!({ "percent": calc::percent(score, max_score).map(calc::round_off_1_decimal) })
        }
        ExamKind::Modul => {
            let subject_id = required_str(params, "subjectId")?;
            require_row(conn, "subjects", &subject_id, "subject")?;
            let scores = ModulScores {
                test: required_f64(params, "testScore")?,
                written: required_f64(params, "writtenScore")?,
                oral: required_f64(params, "oralScore")?,
            };
            scores.validate().map_err(AppError::BadParams)?;
            conn.execute(
                "INSERT INTO modul_exams(id, student_id, subject_id, test_score, written_score, oral_score, taken_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student_id,
                    &subject_id,
                    scores.test,
                    scores.written,
                    scores.oral,
                    &taken_at,
                ),
            )
            .map_err(insert_failed("modul_exams"))?;
            json!({ "total": calc::round_off_1_decimal(scores.total()) })
        }
        ExamKind::Dtm => {
            let counts = DtmCounts {
                mandatory: required_i64(params, "mandatoryCorrect")?,
                first_specialized: required_i64(params, "firstSpecializedCorrect")?,
                second_specialized: required_i64(params, "secondSpecializedCorrect")?,
            };
            counts.validate().map_err(AppError::BadParams)?;
            let score = counts.score();
            conn.execute(
                "INSERT INTO dtm_exams(id, student_id, mandatory_correct, first_specialized_correct, second_specialized_correct, score, taken_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student_id,
                    counts.mandatory,
                    counts.first_specialized,
                    counts.second_specialized,
                    score,
                    &taken_at,
                ),
            )
            .map_err(insert_failed("dtm_exams"))?;
            json!({ "score": score, "maxScore": calc::dtm_max_score() })
        }
    };

    let mut out = json!({ "examId": id, "kind": kind.as_str() });
    if let (Some(o), Some(s)) = (out.as_object_mut(), summary.as_object()) {
        for (k, v) in s {
            o.insert(k.clone(), v.clone());
        }
    }
    Ok(out)
}

fn list_kind(conn: &Connection, kind: ExamKind, student_id: &str) -> AppResult<Vec<serde_json::Value>> {
    // Modul and DTM have a fixed ceiling; the other kinds store theirs per row.
    let fixed_max = match kind {
        ExamKind::Modul => Some(calc::MODUL_MAX),
        ExamKind::Dtm => Some(calc::dtm_max_score()),
        _ => None,
    };
    let sql = match kind {
        ExamKind::Topic => {
            "SELECT x.id, x.taken_at, t.title, CAST(x.correct AS REAL), CAST(x.total AS REAL)
             FROM topic_tests x JOIN topics t ON t.id = x.topic_id
             WHERE x.student_id = ? ORDER BY x.taken_at"
        }
        ExamKind::Section => {
            "SELECT x.id, x.taken_at, s.title, x.score, x.max_score
             FROM section_exams x JOIN sections s ON s.id = x.section_id
             WHERE x.student_id = ? ORDER BY x.taken_at"
        }
        ExamKind::Block => {
            "SELECT x.id, x.taken_at, b.title, x.score, x.max_score
             FROM block_exams x JOIN blocks b ON b.id = x.block_id
             WHERE x.student_id = ? ORDER BY x.taken_at"
        }
        ExamKind::Modul => {
            "SELECT x.id, x.taken_at, s.name, x.test_score + x.written_score + x.oral_score
             FROM modul_exams x JOIN subjects s ON s.id = x.subject_id
             WHERE x.student_id = ? ORDER BY x.taken_at"
        }
        ExamKind::Dtm => {
            "SELECT x.id, x.taken_at, 'DTM', x.score
             FROM dtm_exams x
             WHERE x.student_id = ? ORDER BY x.taken_at"
        }
    };
    let mut stmt = conn.prepare(sql).map_err(query_failed)?;
    stmt.query_map([student_id], |r| {
        let id: String = r.get(0)?;
        let taken_at: String = r.get(1)?;
        let title: String = r.get(2)?;
        let score: f64 = r.get(3)?;
        let max_score: f64 = match fixed_max {
            Some(m) => m,
            None => r.get(4)?,
        };
        Ok(json!({
            "id": id,
            "kind": kind.as_str(),
            "takenAt": taken_at,
            "title": title,
            "score": calc::round_off_1_decimal(score),
            "maxScore": max_score,
            "percent": calc::percent(score, max_score).map(calc::round_off_1_decimal),
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_failed)
}

fn exams_list(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    ensure_can_view_student(conn, actor, &student_id)?;
    let kinds: Vec<ExamKind> = match optional_str(params, "kind")? {
        Some(k) => vec![parse_kind(&k)?],
        None => ExamKind::ALL.to_vec(),
    };
    let mut exams = Vec::new();
    for kind in kinds {
        exams.extend(list_kind(conn, kind, &student_id)?);
    }
    Ok(json!({ "exams": exams }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "exams.record" => exams_record,
        "exams.list" => exams_list,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
