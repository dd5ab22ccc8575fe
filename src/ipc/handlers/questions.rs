use crate::calc;
use crate::domain::Role;
use crate::error::{insert_failed, query_failed, AppError, AppResult};
use crate::ipc::access::Actor;
use crate::ipc::helpers::{dispatch, new_id, now_rfc3339, require_row, required_str, Handler};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const OPTION_LETTERS: [char; 4] = ['A', 'B', 'C', 'D'];

fn parse_option_letter(raw: &str) -> Option<char> {
    let t = raw.trim();
    let mut chars = t.chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !OPTION_LETTERS.contains(&c) {
        return None;
    }
    Some(c)
}

fn questions_create(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Teacher, Role::Admin])?;
    let topic_id = required_str(params, "topicId")?;
    let text = required_str(params, "text")?;
    let options: Vec<String> = params
        .get("options")
        .and_then(|v| v.as_array())
        .ok_or_else(|| AppError::bad_params("missing options"))?
        .iter()
        .map(|v| v.as_str().map(|s| s.trim().to_string()).unwrap_or_default())
        .collect();
    if options.len() != OPTION_LETTERS.len() || options.iter().any(|o| o.is_empty()) {
        return Err(AppError::bad_params("options must be 4 non-empty strings"));
    }
    let correct = parse_option_letter(&required_str(params, "correctOption")?)
        .ok_or_else(|| AppError::bad_params("correctOption must be A, B, C or D"))?;
    require_row(conn, "topics", &topic_id, "topic")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO questions(id, topic_id, text, option_a, option_b, option_c, option_d, correct_option)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &topic_id,
            &text,
            &options[0],
            &options[1],
            &options[2],
            &options[3],
            correct.to_string(),
        ),
    )
    .map_err(insert_failed("questions"))?;
    Ok(json!({ "questionId": id }))
}

struct QuestionRow {
    id: String,
    text: String,
    options: [String; 4],
    correct: String,
}

fn load_questions(conn: &Connection, topic_id: &str) -> AppResult<Vec<QuestionRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, text, option_a, option_b, option_c, option_d, correct_option
             FROM questions
             WHERE topic_id = ?
             ORDER BY rowid",
        )
        .map_err(query_failed)?;
    stmt.query_map([topic_id], |r| {
        Ok(QuestionRow {
            id: r.get(0)?,
            text: r.get(1)?,
            options: [r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?],
            correct: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_failed)
}

/// Students never see the answer key.
fn questions_list(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let topic_id = required_str(params, "topicId")?;
    require_row(conn, "topics", &topic_id, "topic")?;
    let reveal = actor.is_staff();
    let questions: Vec<serde_json::Value> = load_questions(conn, &topic_id)?
        .into_iter()
        .map(|q| {
            let mut v = json!({
                "id": q.id,
                "text": q.text,
                "options": q.options,
            });
            if reveal {
                v["correctOption"] = json!(q.correct);
            }
            v
        })
        .collect();
    Ok(json!({ "questions": questions }))
}

/// Grades a student's answers against the topic's question set and stores a topic test.
/// Unanswered questions count as wrong.
fn topic_tests_submit(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Student])?;
    let student_id = actor.profile_id(conn)?;
    let topic_id = required_str(params, "topicId")?;
    require_row(conn, "topics", &topic_id, "topic")?;
    let answers = params
        .get("answers")
        .and_then(|v| v.as_object())
        .ok_or_else(|| AppError::bad_params("answers must be an object of questionId -> letter"))?;

    let questions = load_questions(conn, &topic_id)?;
    if questions.is_empty() {
        return Err(AppError::bad_params("topic has no questions"));
    }
    if let Some(unknown) = answers
        .keys()
        .find(|k| !questions.iter().any(|q| q.id == **k))
    {
        return Err(AppError::bad_params(format!(
            "answer for unknown question: {}",
            unknown
        )));
    }

    let mut results: Vec<serde_json::Value> = Vec::with_capacity(questions.len());
    let mut correct = 0_i64;
    for q in &questions {
        let given = answers
            .get(&q.id)
            .and_then(|v| v.as_str())
            .and_then(parse_option_letter);
        let is_correct = given.map(|c| c.to_string() == q.correct).unwrap_or(false);
        if is_correct {
            correct += 1;
        }
        results.push(json!({ "questionId": q.id, "correct": is_correct }));
    }
    let total = questions.len() as i64;

    let id = new_id();
    conn.execute(
        "INSERT INTO topic_tests(id, student_id, topic_id, correct, total, taken_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &student_id, &topic_id, correct, total, now_rfc3339()),
    )
    .map_err(insert_failed("topic_tests"))?;

    Ok(json!({
        "testId": id,
        "correct": correct,
        "total": total,
        "percent": calc::percent(correct as f64, total as f64).map(calc::round_off_1_decimal),
        "results": results,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "questions.create" => questions_create,
        "questions.list" => questions_list,
        "topicTests.submit" => topic_tests_submit,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
