//! Minimal server-rendered pages for the rule forms.

use crate::api::flash::Flash;
use crate::db::models::rule::{Rule, RuleSummary};

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

const NAV: &str = r#"<nav><a href="/create">Create</a> | <a href="/read">Rules</a> | <a href="/update_form">Update</a> | <a href="/delete_form">Delete</a></nav>"#;

fn layout(title: &str, flashes: &[Flash], body: &str) -> String {
    let notices: String = flashes
        .iter()
        .map(|f| {
            format!(
                "<div class=\"flash flash-{}\" role=\"alert\">{}</div>\n",
                f.level.as_str(),
                escape(&f.message)
            )
        })
        .collect();

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title} · Data-quality rules</title>\n</head>\n<body>\n{NAV}\n<h1>{title}</h1>\n{notices}{body}\n</body>\n</html>\n",
        title = escape(title),
    )
}

fn text_input(name: &str, label: &str) -> String {
    format!(
        "<label>{label} <input type=\"text\" name=\"{name}\" required></label><br>\n"
    )
}

fn summary_table(rules: &[RuleSummary]) -> String {
    if rules.is_empty() {
        return "<p>No rules found.</p>\n".to_string();
    }
    let rows: String = rules
        .iter()
        .map(|r| {
            format!(
                "<tr><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&r.rule_id),
                escape(&r.source_table_id),
                escape(&r.metric_column),
                escape(&r.rule_description)
            )
        })
        .collect();
    format!(
        "<table>\n<tr><th>Rule ID</th><th>Table</th><th>Column</th><th>Description</th></tr>\n{rows}</table>\n"
    )
}

pub fn create_page(flashes: &[Flash]) -> String {
    let form = format!(
        "<form method=\"post\" action=\"/create\">\n{}{}{}<button type=\"submit\">Generate rule</button>\n</form>",
        text_input("table", "Table"),
        text_input("column", "Column"),
        text_input("description", "Rule description"),
    );
    layout("Create rule", flashes, &form)
}

pub fn read_page(rules: &[Rule], flashes: &[Flash]) -> String {
    let body = if rules.is_empty() {
        "<p>No rules found.</p>".to_string()
    } else {
        let rows: String = rules
            .iter()
            .map(|r| {
                format!(
                    "<tr><td><code>{}</code></td><td>{}</td><td>{}</td><td><pre>{}</pre></td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                    escape(&r.rule_id),
                    escape(&r.source_table_id),
                    escape(&r.metric_column),
                    escape(&r.rule_sql),
                    escape(&r.rule_family),
                    escape(&r.rule_description),
                    r.rule_generation_timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                )
            })
            .collect();
        format!(
            "<table>\n<tr><th>Rule ID</th><th>Table</th><th>Column</th><th>SQL</th><th>Family</th><th>Description</th><th>Generated</th></tr>\n{rows}</table>"
        )
    };
    layout("Rules", flashes, &body)
}

pub fn update_page(rules: &[RuleSummary], flashes: &[Flash]) -> String {
    let body = format!(
        "{}<form method=\"post\" action=\"/update\">\n{}{}{}{}<button type=\"submit\">Regenerate rule</button>\n</form>",
        summary_table(rules),
        text_input("rule_id", "Rule ID"),
        text_input("table", "Table"),
        text_input("column", "Column"),
        text_input("description", "New description"),
    );
    layout("Update rule", flashes, &body)
}

pub fn delete_page(rules: &[RuleSummary], flashes: &[Flash]) -> String {
    let body = format!(
        "{}<form method=\"post\" action=\"/delete\">\n{}<button type=\"submit\">Delete rule</button>\n</form>",
        summary_table(rules),
        text_input("rule_id", "Rule ID"),
    );
    layout("Delete rule", flashes, &body)
}
