//! Landing page markup

use crate::state::{format_size, SharedFileSet};

const STYLE: &str = r#"
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #1a1a2e;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            padding: 20px;
            color: #eee;
        }
        .container {
            background: #16213e;
            border-radius: 8px;
            padding: 40px;
            box-shadow: 0 4px 20px rgba(0,0,0,0.4);
            max-width: 480px;
            width: 100%;
        }
        h1 { font-size: 24px; font-weight: 600; margin-bottom: 8px; text-align: center; }
        .subtitle { font-size: 14px; color: #888; text-align: center; margin-bottom: 24px; }
        .file-list {
            list-style: none;
            background: #0f0f1a;
            border-radius: 6px;
            border: 1px solid #2a3a5e;
            margin-bottom: 32px;
        }
        .file-list li {
            display: flex;
            justify-content: space-between;
            padding: 12px 16px;
            font-size: 14px;
            font-family: 'SF Mono', 'Consolas', monospace;
            border-bottom: 1px solid #2a3a5e;
            color: #ccc;
        }
        .file-list li:last-child { border-bottom: none; }
        .size { color: #666; margin-left: 12px; white-space: nowrap; }
        .download-button {
            display: block;
            padding: 16px 24px;
            background: #4361ee;
            color: #fff;
            border-radius: 6px;
            font-size: 15px;
            text-decoration: none;
            text-align: center;
        }
        .download-button:hover { background: #3a56d4; }
"#;

/// Render the landing page listing every shared file in order
pub fn render_landing(files: &SharedFileSet) -> String {
    let items: String = files
        .iter()
        .map(|f| {
            format!(
                "<li><span>{}</span><span class=\"size\">{}</span></li>",
                escape_html(&f.name),
                format_size(f.size)
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>qrtunnel</title>
    <style>{style}</style>
</head>
<body>
    <div class="container">
        <h1>Files Ready</h1>
        <p class="subtitle">{count} file(s), {total}</p>
        <ul class="file-list">{items}</ul>
        <a href="/download" class="download-button">Download All</a>
    </div>
</body>
</html>"#,
        style = STYLE,
        count = files.len(),
        total = format_size(files.total_size()),
        items = items,
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
