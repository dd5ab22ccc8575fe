//! Row loaders feeding the pure aggregations in `calc`.

use crate::calc::{
    self, AttendanceSummary, GradeComponents, GradeWeights, RankInput, RankedRow,
    RatingBreakdown, SentimentSummary,
};
use crate::db;
use crate::domain::{AttendanceStatus, CommentKind};
use crate::error::{query_failed, AppError, AppResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const GRADE_WEIGHTS_KEY: &str = "grades.weights";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub student_id: String,
    pub user_id: String,
    pub display_name: String,
    pub group_name: Option<String>,
}

const STUDENT_SELECT: &str = "SELECT s.id, s.user_id, u.last_name, u.first_name, s.group_name
     FROM students s
     JOIN users u ON u.id = s.user_id";

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentInfo> {
    let last: String = r.get(2)?;
    let first: String = r.get(3)?;
    Ok(StudentInfo {
        student_id: r.get(0)?,
        user_id: r.get(1)?,
        display_name: format!("{}, {}", last, first),
        group_name: r.get(4)?,
    })
}

pub fn load_student(conn: &Connection, student_id: &str) -> AppResult<StudentInfo> {
    let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
    conn.query_row(&sql, [student_id], student_from_row)
        .optional()
        .map_err(query_failed)?
        .ok_or_else(|| AppError::not_found("student not found"))
}

/// All students, optionally restricted to one group, ordered by name.
pub fn list_students(conn: &Connection, group_name: Option<&str>) -> AppResult<Vec<StudentInfo>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR s.group_name = ?1) ORDER BY u.last_name, u.first_name",
        STUDENT_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
    stmt.query_map([group_name], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)
}

pub fn children_of_parent(conn: &Connection, parent_id: &str) -> AppResult<Vec<StudentInfo>> {
    let sql = format!(
        "{} WHERE s.parent_id = ? ORDER BY u.last_name, u.first_name",
        STUDENT_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
    stmt.query_map([parent_id], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)
}

/// Rows with an unrecognised status are skipped rather than failing the summary.
pub fn attendance_for_student(conn: &Connection, student_id: &str) -> AppResult<AttendanceSummary> {
    let mut stmt = conn
        .prepare("SELECT status FROM attendance WHERE student_id = ?")
        .map_err(query_failed)?;
    let statuses = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(calc::attendance_summary(
        statuses.iter().filter_map(|s| AttendanceStatus::parse(s)),
    ))
}

pub fn sentiment_for_student(conn: &Connection, student_id: &str) -> AppResult<SentimentSummary> {
    let mut stmt = conn
        .prepare("SELECT kind FROM comments WHERE student_id = ?")
        .map_err(query_failed)?;
    let kinds = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(calc::comment_sentiment(
        kinds.iter().filter_map(|k| CommentKind::parse(k)),
    ))
}

pub fn grade_weights(conn: &Connection) -> AppResult<GradeWeights> {
    let stored = db::settings_get_json(conn, GRADE_WEIGHTS_KEY)
        .map_err(|e| AppError::Internal(format!("{e:#}")))?;
    match stored {
        Some(v) => GradeWeights::from_json(&v).map_err(AppError::Internal),
        None => Ok(GradeWeights::default()),
    }
}

/// Rows are `(score, max)`, or just `score` when `fixed_max` is given.
fn percent_rows(
    conn: &Connection,
    sql: &str,
    student_id: &str,
    subject_id: &str,
    fixed_max: Option<f64>,
) -> AppResult<Vec<f64>> {
    let mut stmt = conn.prepare(sql).map_err(query_failed)?;
    let pairs = stmt
        .query_map([student_id, subject_id], |r| {
            let max = match fixed_max {
                Some(m) => m,
                None => r.get::<_, f64>(1)?,
            };
            Ok((r.get::<_, f64>(0)?, max))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(pairs
        .into_iter()
        .filter_map(|(score, max)| calc::percent(score, max))
        .collect())
}

pub fn grade_components(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> AppResult<GradeComponents> {
    let topic = percent_rows(
        conn,
        "SELECT CAST(tt.correct AS REAL), CAST(tt.total AS REAL)
         FROM topic_tests tt
         JOIN topics t ON t.id = tt.topic_id
         JOIN blocks b ON b.id = t.block_id
         JOIN sections s ON s.id = b.section_id
         WHERE tt.student_id = ? AND s.subject_id = ?",
        student_id,
        subject_id,
        None,
    )?;
    let section = percent_rows(
        conn,
        "SELECT se.score, se.max_score
         FROM section_exams se
         JOIN sections s ON s.id = se.section_id
         WHERE se.student_id = ? AND s.subject_id = ?",
        student_id,
        subject_id,
        None,
    )?;
    let block = percent_rows(
        conn,
        "SELECT be.score, be.max_score
         FROM block_exams be
         JOIN blocks b ON b.id = be.block_id
         JOIN sections s ON s.id = b.section_id
         WHERE be.student_id = ? AND s.subject_id = ?",
        student_id,
        subject_id,
        None,
    )?;
    let modul = percent_rows(
        conn,
        "SELECT test_score + written_score + oral_score
         FROM modul_exams
         WHERE student_id = ? AND subject_id = ?",
        student_id,
        subject_id,
        Some(calc::MODUL_MAX),
    )?;
    Ok(GradeComponents {
        topic: calc::mean(topic),
        section: calc::mean(section),
        block: calc::mean(block),
        modul: calc::mean(modul),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGradeReport {
    pub subject_id: String,
    pub subject_name: String,
    pub components: GradeComponents,
    pub final_percent: Option<f64>,
    pub letter: Option<u8>,
}

pub fn final_grade_for(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    subject_name: &str,
    weights: &GradeWeights,
) -> AppResult<FinalGradeReport> {
    let components = grade_components(conn, student_id, subject_id)?;
    let final_percent = calc::final_grade(&components, weights);
    Ok(FinalGradeReport {
        subject_id: subject_id.to_string(),
        subject_name: subject_name.to_string(),
        components: components.rounded(),
        final_percent,
        letter: final_percent.map(calc::letter_grade),
    })
}

pub fn subject_name(conn: &Connection, subject_id: &str) -> AppResult<String> {
    conn.query_row("SELECT name FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| AppError::not_found("subject not found"))
}

fn all_subjects(conn: &Connection) -> AppResult<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects ORDER BY name")
        .map_err(query_failed)?;
    stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)
}

/// One report per subject, including subjects without any records.
pub fn final_grades_all_subjects(
    conn: &Connection,
    student_id: &str,
    weights: &GradeWeights,
) -> AppResult<Vec<FinalGradeReport>> {
    all_subjects(conn)?
        .iter()
        .map(|(id, name)| final_grade_for(conn, student_id, id, name, weights))
        .collect()
}

pub fn compute_rating(
    conn: &Connection,
    student_id: &str,
    weights: &GradeWeights,
) -> AppResult<RatingBreakdown> {
    let grades = final_grades_all_subjects(conn, student_id, weights)?;
    let grade = calc::mean(grades.iter().filter_map(|g| g.final_percent));
    let attendance = attendance_for_student(conn, student_id)?.exact_rate();
    let net = sentiment_for_student(conn, student_id)?.net();
    Ok(calc::rating_score(grade, attendance, net))
}

pub fn store_rating(
    conn: &Connection,
    student_id: &str,
    rating: &RatingBreakdown,
    computed_at: &str,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO current_ratings(student_id, score, grade_component, attendance_component, sentiment_component, computed_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           score = excluded.score,
           grade_component = excluded.grade_component,
           attendance_component = excluded.attendance_component,
           sentiment_component = excluded.sentiment_component,
           computed_at = excluded.computed_at",
        (
            student_id,
            rating.score,
            rating.grade_component,
            rating.attendance_component,
            rating.sentiment_component,
            computed_at,
        ),
    )
    .map_err(crate::error::update_failed("current_ratings"))?;
    Ok(())
}

/// Tournament table by final grade in one subject.
pub fn ranking_by_subject(
    conn: &Connection,
    subject_id: &str,
    group_name: Option<&str>,
    weights: &GradeWeights,
) -> AppResult<Vec<RankedRow>> {
    let students = list_students(conn, group_name)?;
    let mut input = Vec::with_capacity(students.len());
    for s in students {
        let components = grade_components(conn, &s.student_id, subject_id)?;
        input.push(RankInput {
            student_id: s.student_id,
            display_name: s.display_name,
            score: calc::final_grade(&components, weights),
        });
    }
    Ok(calc::rank_competition(input))
}

/// Tournament table over the stored rating snapshots.
pub fn ranking_by_rating(conn: &Connection, group_name: Option<&str>) -> AppResult<Vec<RankedRow>> {
    let students = list_students(conn, group_name)?;
    let mut stmt = conn
        .prepare("SELECT score FROM current_ratings WHERE student_id = ?")
        .map_err(query_failed)?;
    let mut input = Vec::with_capacity(students.len());
    for s in students {
        let score: Option<f64> = stmt
            .query_row([&s.student_id], |r| r.get(0))
            .optional()
            .map_err(query_failed)?;
        input.push(RankInput {
            student_id: s.student_id,
            display_name: s.display_name,
            score,
        });
    }
    Ok(calc::rank_competition(input))
}

/// The per-student block shared by the student and parent dashboards.
pub fn student_summary(conn: &Connection, student_id: &str) -> AppResult<serde_json::Value> {
    let student = load_student(conn, student_id)?;
    let weights = grade_weights(conn)?;
    let attendance = attendance_for_student(conn, student_id)?;
    let sentiment = sentiment_for_student(conn, student_id)?;
    let grades = final_grades_all_subjects(conn, student_id, &weights)?;
    let rating: Option<(f64, String)> = conn
        .query_row(
            "SELECT score, computed_at FROM current_ratings WHERE student_id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_failed)?;
    let rank = ranking_by_rating(conn, student.group_name.as_deref())?
        .into_iter()
        .find(|r| r.student_id == student_id)
        .and_then(|r| r.rank);

    Ok(serde_json::json!({
        "student": student,
        "attendance": attendance,
        "sentiment": sentiment,
        "grades": grades,
        "rating": rating.map(|(score, computed_at)| serde_json::json!({
            "score": score,
            "computedAt": computed_at,
            "groupRank": rank,
        })),
    }))
}
