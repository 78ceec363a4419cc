//! Resume context condensation from transcript text.

use serde_json::json;

use agent_relay::config::ResumeConfig;
use agent_relay::resume::{build_context, HEADER, HEADER_TRUNCATED};

fn event(payload: &serde_json::Value) -> String {
    json!({ "type": "event_msg", "payload": payload }).to_string()
}

fn user(text: &str) -> String {
    event(&json!({ "type": "user_message", "message": text }))
}

fn assistant(text: &str) -> String {
    event(&json!({ "type": "agent_message", "message": text }))
}

fn transcript(lines: &[String]) -> String {
    lines.join("\n")
}

#[test]
fn renders_role_tagged_lines_under_plain_header() {
    let raw = transcript(&[
        user("fix the bug"),
        event(&json!({ "type": "agent_reasoning", "text": "**Look**\nat parser" })),
        event(&json!({
            "type": "exec_command_begin",
            "call_id": "c1",
            "command": ["cargo", "test"]
        })),
        event(&json!({
            "type": "exec_command_end",
            "call_id": "c1",
            "exit_code": 1,
            "stdout": "1 failed"
        })),
        assistant("fixed"),
    ]);

    let ctx = build_context(&raw, &ResumeConfig::default()).expect("context");
    assert!(!ctx.truncated);
    assert_eq!(ctx.items, 5);

    let lines: Vec<&str> = ctx.text.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "User: fix the bug");
    assert_eq!(lines[2], "Reasoning: Look: at parser");
    assert!(lines[3].starts_with("Tool call (shell): "));
    assert_eq!(lines[4], "Tool error: 1 failed");
    assert_eq!(lines[5], "Assistant: fixed");
}

#[test]
fn consecutive_duplicates_collapse() {
    let raw = transcript(&[user("again"), user("again"), assistant("ok"), user("again")]);
    let ctx = build_context(&raw, &ResumeConfig::default()).expect("context");
    assert_eq!(ctx.items, 3);
}

#[test]
fn oversized_item_is_cut_and_marked() {
    let limits = ResumeConfig {
        max_item_chars: 10,
        ..ResumeConfig::default()
    };
    let raw = transcript(&[user("short"), assistant("this reply is far too long")]);

    let ctx = build_context(&raw, &limits).expect("context");
    assert!(ctx.truncated);
    assert!(ctx.text.starts_with(HEADER_TRUNCATED));
    assert!(ctx.text.contains("Assistant: this reply… [16 chars truncated]"));
    assert!(ctx.text.contains("User: short"));
}

#[test]
fn oldest_items_drop_first_when_over_item_limit() {
    let limits = ResumeConfig {
        max_items: 2,
        ..ResumeConfig::default()
    };
    let raw = transcript(&[user("one"), assistant("two"), user("three")]);

    let ctx = build_context(&raw, &limits).expect("context");
    assert!(ctx.truncated);
    assert_eq!(ctx.items, 2);
    assert!(!ctx.text.contains("User: one"));
    assert!(ctx.text.ends_with("Assistant: two\nUser: three"));
}

#[test]
fn total_character_budget_is_enforced() {
    let limits = ResumeConfig {
        max_chars: 30,
        ..ResumeConfig::default()
    };
    let raw = transcript(&[
        user("aaaaaaaaaaaaaaaaaaaa"),
        assistant("bbbbbbbbbbbbbbb"),
    ]);

    let ctx = build_context(&raw, &limits).expect("context");
    assert_eq!(ctx.items, 1);
    assert!(ctx.text.ends_with("Assistant: bbbbbbbbbbbbbbb"));
}

#[test]
fn diffs_and_junk_yield_no_context() {
    let raw = transcript(&[
        "garbage".to_owned(),
        event(&json!({ "type": "turn_diff", "unified_diff": "--- a\n+++ b\n" })),
        event(&json!({ "type": "token_count", "info": {} })),
    ]);
    assert!(build_context(&raw, &ResumeConfig::default()).is_none());
    assert!(build_context("", &ResumeConfig::default()).is_none());
}
