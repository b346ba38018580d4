//! Terminal rendering of the view model.

use std::fmt::Write;

use crate::models::{Changeset, ViewModel};

const AUTHOR_WIDTH: usize = 22;
const NODE_WIDTH: usize = 12;
const DESC_WIDTH: usize = 40;

pub const POLLING_NOTICE: &str = "Some changesets are still being processed and we are actively \
polling them until we get a result.";

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn row(cset: &Changeset) -> String {
    let first_line = cset.desc.lines().next().unwrap_or("");
    let bug = if cset.bug_url.is_some() { " [bug]" } else { "" };
    format!(
        "{:<aw$}  {:<nw$}  {:<dw$}{:<6}  {}",
        truncate(&cset.author, AUTHOR_WIDTH),
        truncate(&cset.node, NODE_WIDTH),
        truncate(first_line, DESC_WIDTH),
        bug,
        cset.summary,
        aw = AUTHOR_WIDTH,
        nw = NODE_WIDTH,
        dw = DESC_WIDTH,
    )
}

/// Render the view as a plain-text table.
pub fn render_table(view: &ViewModel) -> String {
    let mut out = String::new();
    if !view.error_message.is_empty() {
        let _ = writeln!(out, "{}", view.error_message);
        return out;
    }
    if view.polling_enabled {
        let _ = writeln!(out, "{}", POLLING_NOTICE);
        out.push('\n');
    }
    if view.visible_changesets.is_empty() {
        let _ = writeln!(out, "Loading...");
        return out;
    }
    let _ = writeln!(
        out,
        "{:<aw$}  {:<nw$}  {:<dw$}{:<6}  {}",
        "AUTHOR",
        "CHANGESET",
        "DESCRIPTION",
        "",
        "COVERAGE SUMMARY",
        aw = AUTHOR_WIDTH,
        nw = NODE_WIDTH,
        dw = DESC_WIDTH,
    );
    let _ = writeln!(out, "{}", "-".repeat(AUTHOR_WIDTH + NODE_WIDTH + DESC_WIDTH + 28));
    for cset in &view.visible_changesets {
        let _ = writeln!(out, "{}", row(cset));
    }
    out
}

pub fn render_json(view: &ViewModel) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(view)?)
}
