//! Shared wire-format fixtures: NDJSON event lines and vertex results.

use serde_json::{Value, json};

use flowbuild::events::BuildEvent;
use flowbuild::vertex::VertexBuildResult;

/// One NDJSON event line.
pub fn event_line(tag: &str, data: Value) -> String {
    json!({"event": tag, "data": data}).to_string()
}

/// Join event lines into an NDJSON body.
pub fn script(lines: &[String]) -> String {
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

pub fn sorted_line(ids: &[&str], to_run: &[&str]) -> String {
    event_line("vertices_sorted", json!({"ids": ids, "to_run": to_run}))
}

/// Wire JSON for a per-vertex result. Invalid results carry an error log
/// entry whose text is `"<id> exploded"`.
pub fn vertex_result_json(id: &str, valid: bool, next: &[&str]) -> Value {
    let outputs = if valid {
        json!({"text": {"message": "ok", "type": "message"}})
    } else {
        json!({"text": {"message": {"errorMessage": format!("{id} exploded")}, "type": "error"}})
    };
    json!({
        "id": id,
        "valid": valid,
        "data": {"outputs": outputs},
        "next_vertices_ids": next,
    })
}

pub fn vertex_result(id: &str, valid: bool, next: &[&str]) -> VertexBuildResult {
    serde_json::from_value(vertex_result_json(id, valid, next)).expect("vertex result fixture")
}

pub fn end_vertex_line(id: &str, valid: bool, next: &[&str]) -> String {
    event_line("end_vertex", json!({"build_data": vertex_result_json(id, valid, next)}))
}

pub fn end_line() -> String {
    event_line("end", json!({}))
}

pub fn parse_event(line: &str) -> BuildEvent {
    BuildEvent::from_line(line).expect("event fixture")
}

/// The linear A -> B -> C happy-path script.
pub fn linear_happy_script() -> String {
    script(&[
        sorted_line(&["a", "b", "c"], &["a", "b", "c"]),
        end_vertex_line("a", true, &["b"]),
        end_vertex_line("b", true, &["c"]),
        end_vertex_line("c", true, &[]),
        end_line(),
    ])
}

/// Planner response for a linear A -> B -> C flow.
pub fn linear_order_response() -> Value {
    json!({
        "ids": ["a", "b", "c"],
        "run_id": "run-1",
        "vertices_to_run": ["a", "b", "c"],
    })
}
