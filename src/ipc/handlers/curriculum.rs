use crate::domain::Role;
use crate::error::{
    commit_failed, delete_failed, insert_failed, query_failed, tx_failed, update_failed,
    AppResult,
};
use crate::ipc::access::Actor;
use crate::ipc::helpers::{dispatch, new_id, next_sort_order, require_row, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

const EDITORS: &[Role] = &[Role::Admin, Role::Teacher];

fn subjects_create(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(EDITORS)?;
    let name = required_str(params, "name")?;
    let id = new_id();
    conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (&id, &name))
        .map_err(insert_failed("subjects"))?;
    Ok(json!({ "subjectId": id, "name": name }))
}

fn subjects_list(conn: &Connection, _actor: &Actor, _params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let mut stmt = conn
        .prepare(
            "SELECT
               sub.id,
               sub.name,
               (SELECT COUNT(*) FROM sections s WHERE s.subject_id = sub.id) AS section_count,
               (SELECT COUNT(*)
                  FROM topics t
                  JOIN blocks b ON b.id = t.block_id
                  JOIN sections s ON s.id = b.section_id
                 WHERE s.subject_id = sub.id) AS topic_count
             FROM subjects sub
             ORDER BY sub.name",
        )
        .map_err(query_failed)?;
    let subjects = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let section_count: i64 = r.get(2)?;
            let topic_count: i64 = r.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "sectionCount": section_count,
                "topicCount": topic_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "subjects": subjects }))
}

/// Removes the subject and its whole content tree, with every record hanging off it.
fn subjects_delete(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(&[Role::Admin])?;
    let subject_id = required_str(params, "subjectId")?;
    require_row(conn, "subjects", &subject_id, "subject")?;

    const TOPICS_OF_SUBJECT: &str = "SELECT t.id FROM topics t
         JOIN blocks b ON b.id = t.block_id
         JOIN sections s ON s.id = b.section_id
         WHERE s.subject_id = ?1";
    const BLOCKS_OF_SUBJECT: &str = "SELECT b.id FROM blocks b
         JOIN sections s ON s.id = b.section_id
         WHERE s.subject_id = ?1";
    const SECTIONS_OF_SUBJECT: &str = "SELECT id FROM sections WHERE subject_id = ?1";

    let tx = conn.unchecked_transaction().map_err(tx_failed)?;
    let steps: [(&'static str, String); 11] = [
        ("questions", format!("DELETE FROM questions WHERE topic_id IN ({})", TOPICS_OF_SUBJECT)),
        ("material_files", format!("DELETE FROM material_files WHERE topic_id IN ({})", TOPICS_OF_SUBJECT)),
        ("attendance", format!("DELETE FROM attendance WHERE topic_id IN ({})", TOPICS_OF_SUBJECT)),
        ("topic_tests", format!("DELETE FROM topic_tests WHERE topic_id IN ({})", TOPICS_OF_SUBJECT)),
        ("topics", format!("DELETE FROM topics WHERE id IN ({})", TOPICS_OF_SUBJECT)),
        ("block_exams", format!("DELETE FROM block_exams WHERE block_id IN ({})", BLOCKS_OF_SUBJECT)),
        ("blocks", format!("DELETE FROM blocks WHERE id IN ({})", BLOCKS_OF_SUBJECT)),
        ("section_exams", format!("DELETE FROM section_exams WHERE section_id IN ({})", SECTIONS_OF_SUBJECT)),
        ("sections", "DELETE FROM sections WHERE subject_id = ?1".to_string()),
        ("modul_exams", "DELETE FROM modul_exams WHERE subject_id = ?1".to_string()),
        ("subjects", "DELETE FROM subjects WHERE id = ?1".to_string()),
    ];
    tx.execute("UPDATE teachers SET subject_id = NULL WHERE subject_id = ?", [&subject_id])
        .map_err(update_failed("teachers"))?;
    for (table, sql) in steps {
        tx.execute(&sql, [&subject_id]).map_err(delete_failed(table))?;
    }
    tx.commit().map_err(commit_failed)?;
    Ok(json!({ "deleted": true }))
}

/// One level of the content tree: `table` rows hang off `parent_table` via `parent_column`.
struct Level {
    table: &'static str,
    parent_table: &'static str,
    parent_column: &'static str,
    parent_param: &'static str,
    parent_what: &'static str,
    id_key: &'static str,
    list_key: &'static str,
}

const SECTIONS: Level = Level {
    table: "sections",
    parent_table: "subjects",
    parent_column: "subject_id",
    parent_param: "subjectId",
    parent_what: "subject",
    id_key: "sectionId",
    list_key: "sections",
};

const BLOCKS: Level = Level {
    table: "blocks",
    parent_table: "sections",
    parent_column: "section_id",
    parent_param: "sectionId",
    parent_what: "section",
    id_key: "blockId",
    list_key: "blocks",
};

const TOPICS: Level = Level {
    table: "topics",
    parent_table: "blocks",
    parent_column: "block_id",
    parent_param: "blockId",
    parent_what: "block",
    id_key: "topicId",
    list_key: "topics",
};

fn level_create(level: &Level, conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    actor.require(EDITORS)?;
    let parent_id = required_str(params, level.parent_param)?;
    let title = required_str(params, "title")?;
    require_row(conn, level.parent_table, &parent_id, level.parent_what)?;
    let sort_order = next_sort_order(conn, level.table, level.parent_column, &parent_id)?;
    let id = new_id();
    conn.execute(
        &format!(
            "INSERT INTO {}(id, {}, title, sort_order) VALUES(?, ?, ?, ?)",
            level.table, level.parent_column
        ),
        (&id, &parent_id, &title, sort_order),
    )
    .map_err(insert_failed(level.table))?;
    Ok(json!({ (level.id_key): id, "title": title, "sortOrder": sort_order }))
}

fn level_list(level: &Level, conn: &Connection, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let parent_id = required_str(params, level.parent_param)?;
    require_row(conn, level.parent_table, &parent_id, level.parent_what)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, title, sort_order FROM {} WHERE {} = ? ORDER BY sort_order",
            level.table, level.parent_column
        ))
        .map_err(query_failed)?;
    let rows = stmt
        .query_map([&parent_id], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let sort_order: i64 = r.get(2)?;
            Ok(json!({ "id": id, "title": title, "sortOrder": sort_order }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ (level.list_key): rows }))
}

fn sections_create(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    level_create(&SECTIONS, conn, actor, params)
}

fn sections_list(conn: &Connection, _actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    level_list(&SECTIONS, conn, params)
}

fn blocks_create(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    level_create(&BLOCKS, conn, actor, params)
}

fn blocks_list(conn: &Connection, _actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    level_list(&BLOCKS, conn, params)
}

fn topics_create(conn: &Connection, actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    level_create(&TOPICS, conn, actor, params)
}

fn topics_list(conn: &Connection, _actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    level_list(&TOPICS, conn, params)
}

fn curriculum_tree(conn: &Connection, _actor: &Actor, params: &serde_json::Value) -> AppResult<serde_json::Value> {
    let subject_id = required_str(params, "subjectId")?;
    let name = crate::stats::subject_name(conn, &subject_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.title, b.id, b.title, t.id, t.title
             FROM sections s
             LEFT JOIN blocks b ON b.section_id = s.id
             LEFT JOIN topics t ON t.block_id = b.id
             WHERE s.subject_id = ?
             ORDER BY s.sort_order, b.sort_order, t.sort_order",
        )
        .map_err(query_failed)?;
    let rows = stmt
        .query_map([&subject_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    // Rows arrive ordered, so first-seen order is the display order.
    let mut section_order: Vec<(String, String)> = Vec::new();
    let mut blocks_by_section: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let mut topics_by_block: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    for (sid, stitle, bid, btitle, tid, ttitle) in rows {
        if !section_order.iter().any(|(id, _)| *id == sid) {
            section_order.push((sid.clone(), stitle));
        }
        let (Some(bid), Some(btitle)) = (bid, btitle) else {
            continue;
        };
        let blocks = blocks_by_section.entry(sid).or_default();
        if !blocks.iter().any(|(id, _)| *id == bid) {
            blocks.push((bid.clone(), btitle));
        }
        if let (Some(tid), Some(ttitle)) = (tid, ttitle) {
            topics_by_block
                .entry(bid)
                .or_default()
                .push(json!({ "id": tid, "title": ttitle }));
        }
    }

    let sections: Vec<serde_json::Value> = section_order
        .into_iter()
        .map(|(sid, stitle)| {
            let blocks: Vec<serde_json::Value> = blocks_by_section
                .remove(&sid)
                .unwrap_or_default()
                .into_iter()
                .map(|(bid, btitle)| {
                    let topics = topics_by_block.remove(&bid).unwrap_or_default();
                    json!({ "id": bid, "title": btitle, "topics": topics })
                })
                .collect();
            json!({ "id": sid, "title": stitle, "blocks": blocks })
        })
        .collect();

    Ok(json!({
        "subject": { "id": subject_id, "name": name },
        "sections": sections,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: crate::ipc::helpers::Handler = match req.method.as_str() {
        "subjects.create" => subjects_create,
        "subjects.list" => subjects_list,
        "subjects.delete" => subjects_delete,
        "sections.create" => sections_create,
        "sections.list" => sections_list,
        "blocks.create" => blocks_create,
        "blocks.list" => blocks_list,
        "topics.create" => topics_create,
        "topics.list" => topics_list,
        "curriculum.tree" => curriculum_tree,
        _ => return None,
    };
    Some(dispatch(state, req, f))
}
