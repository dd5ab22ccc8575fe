use crate::calc::GradeWeights;
use crate::db;
use crate::domain::Role;
use crate::error::{commit_failed, query_failed, tx_failed, AppError, AppResult};
use crate::ipc::access::{ensure_can_view_student, Actor};
use crate::ipc::helpers::{dispatch, now_rfc3339, optional_str, require_row, required_str, Handler};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::Connection;
use serde_json::json;

fn stats_attendance(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    ensure_can_view_student(conn, actor, &student_id)?;
    let summary = stats::attendance_for_student(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "attendance": summary }))
}

fn stats_comment_sentiment(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    ensure_can_view_student(conn, actor, &student_id)?;
    let summary = stats::sentiment_for_student(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "sentiment": summary }))
}

fn stats_final_grade(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    ensure_can_view_student(conn, actor, &student_id)?;
    let weights = stats::grade_weights(conn)?;
    let grades = match optional_str(params, "subjectId")? {
        Some(subject_id) => {
            let name = stats::subject_name(conn, &subject_id)?;
            vec![stats::final_grade_for(conn, &student_id, &subject_id, &name, &weights)?]
        }
        None => stats::final_grades_all_subjects(conn, &student_id, &weights)?,
    };
    Ok(json!({ "studentId": student_id, "weights": weights, "grades": grades }))
}

/// Per-subject table when `subjectId` is given, otherwise over stored ratings.
fn stats_ranking(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let group_name = optional_str(params, "groupName")?;
    let (basis, rows) = match optional_str(params, "subjectId")? {
        Some(subject_id) => {
            require_row(conn, "subjects", &subject_id, "subject")?;
            let weights = stats::grade_weights(conn)?;
            let rows = stats::ranking_by_subject(conn, &subject_id, group_name.as_deref(), &weights)?;
            ("finalGrade", rows)
        }
        None => ("rating", stats::ranking_by_rating(conn, group_name.as_deref())?),
    };
    Ok(json!({ "basis": basis, "groupName": group_name, "rows": rows }))
}

/// Recomputes and stores rating snapshots for one student or for everyone.
fn ratings_refresh(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let student_ids: Vec<String> = match optional_str(params, "studentId")? {
        Some(id) => {
            require_row(conn, "students", &id, "student")?;
            vec![id]
        }
        None => stats::list_students(conn, None)?
            .into_iter()
            .map(|s| s.student_id)
            .collect(),
    };
    let weights = stats::grade_weights(conn)?;
    let computed_at = now_rfc3339();

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    let mut ratings = Vec::with_capacity(student_ids.len());
    for student_id in &student_ids {
        let rating = stats::compute_rating(&tx, student_id, &weights)?;
        stats::store_rating(&tx, student_id, &rating, &computed_at)?;
        ratings.push(json!({ "studentId": student_id, "rating": rating }));
    }
    tx.commit().map_err(commit_failed)?;
    log::info!("ratings refreshed for {} student(s)", ratings.len());
    Ok(json!({ "refreshed": ratings.len(), "computedAt": computed_at, "ratings": ratings }))
}

fn ratings_list(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let group_name = optional_str(params, "groupName")?;
    let mut stmt = conn
        .prepare(
            "SELECT r.student_id, u.last_name, u.first_name, s.group_name, r.score,
                    r.grade_component, r.attendance_component, r.sentiment_component, r.computed_at
             FROM current_ratings r
             JOIN students s ON s.id = r.student_id
             JOIN users u ON u.id = s.user_id
             WHERE (?1 IS NULL OR s.group_name = ?1)
             ORDER BY r.score DESC, u.last_name, u.first_name",
        )
        .map_err(query_failed)?;
    let ratings = stmt
        .query_map([group_name.as_deref()], |r| {
            let student_id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let group: Option<String> = r.get(3)?;
            let score: f64 = r.get(4)?;
            let grade: Option<f64> = r.get(5)?;
            let attendance: Option<f64> = r.get(6)?;
            let sentiment: Option<f64> = r.get(7)?;
            let computed_at: String = r.get(8)?;
            Ok(json!({
                "studentId": student_id,
                "displayName": format!("{}, {}", last, first),
                "groupName": group,
                "score": score,
                "gradeComponent": grade,
                "attendanceComponent": attendance,
                "sentimentComponent": sentiment,
                "computedAt": computed_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "ratings": ratings }))
}

fn grade_weights_get(conn: &Connection, actor: &Actor, _params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let weights = stats::grade_weights(conn)?;
    Ok(json!({ "weights": weights, "defaults": GradeWeights::default() }))
}

fn grade_weights_set(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Admin])?;
    let raw = params
        .get("weights")
        .ok_or_else(|| AppError::bad_params("missing weights"))?;
    let weights = GradeWeights::from_json(raw).map_err(AppError::BadParams)?;
    let value = serde_json::to_value(weights).map_err(|e| AppError::Internal(e.to_string()))?;
    db::settings_set_json(conn, stats::GRADE_WEIGHTS_KEY, &value)
        .map_err(|e| AppError::Internal(format!("{e:#}")))?;
    Ok(json!({ "weights": weights }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "stats.attendance" => stats_attendance,
        "stats.commentSentiment" => stats_comment_sentiment,
        "stats.finalGrade" => stats_final_grade,
        "stats.ranking" => stats_ranking,
        "ratings.refresh" => ratings_refresh,
        "ratings.list" => ratings_list,
        "settings.gradeWeights.get" => grade_weights_get,
        "settings.gradeWeights.set" => grade_weights_set,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
