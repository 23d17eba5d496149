//! HTML overview page

use axum::{extract::State, response::Html};

use crate::api::{error::ApiResult, state::ApiState};

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// GET /
///
/// Every metric in a two-column table, sorted by name
pub async fn list_metrics(State(state): State<ApiState>) -> ApiResult<Html<String>> {
    let metrics = state.metrics.list_metrics().await?;

    let mut page = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n\
         <table>\n<tr><th>Name</th><th>Value</th></tr>\n",
    );
    for (name, value) in &metrics {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            escape(name),
            escape(value)
        ));
    }
    page.push_str("</table>\n</body>\n</html>\n");

    Ok(Html(page))
}
