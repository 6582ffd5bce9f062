/// HTML lookup table fragment
///
/// One `<tr>` per aquifer, newline separated, for pasting into the web
/// page's table body. Each row's button carries `data-aquifer-id`.

use std::path::Path;

use crate::model::{DissolvedAquifer, PrepError, Result};

pub fn write_aquifer_table(path: &Path, aquifers: &[DissolvedAquifer]) -> Result<()> {
    std::fs::write(path, render_table(aquifers)).map_err(|e| PrepError::io(path, e))
}

pub fn render_table(aquifers: &[DissolvedAquifer]) -> String {
    aquifers
        .iter()
        .map(|a| render_row(&a.name, a.id))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_row(name: &str, id: i64) -> String {
    format!(
        r#"<tr><td>{}</td><td><button data-aquifer-id="{}">Open Aquifer</button></td></tr>"#,
        escape(name),
        id
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
