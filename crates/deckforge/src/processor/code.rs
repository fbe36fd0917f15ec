//! Standalone HTML preview for source code uploads.
//!
//! Files whose language syntect recognises are highlighted with inline
//! styles; anything else is shown as escaped preformatted text.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::{SyntaxReference, SyntaxSet};

use crate::error::ProcessError;

const THEME: &str = "InspiredGitHub";

static SYNTAXES: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEMES: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

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

fn language_of(source: &Path) -> &str {
    match source.extension().and_then(|e| e.to_str()) {
        Some("txt") | None => "text",
        Some(ext) => ext,
    }
}

/// Syntax by file extension, then by shebang or modeline. Plain text does
/// not count as a match.
fn syntax_for(source: &Path, code: &str) -> Option<&'static SyntaxReference> {
    let by_extension = source
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|ext| SYNTAXES.find_syntax_by_extension(ext));

    by_extension
        .or_else(|| SYNTAXES.find_syntax_by_first_line(code))
        .filter(|syntax| syntax.name != "Plain Text")
}

fn highlight(source: &Path, code: &str) -> Option<String> {
    let syntax = syntax_for(source, code)?;
    let theme: &Theme = THEMES.themes.get(THEME)?;

    match highlighted_html_for_string(code, &SYNTAXES, syntax, theme) {
        Ok(html) => Some(html),
        Err(e) => {
            log::warn!("Highlighting {} as {} failed: {}", source.display(), syntax.name, e);
            None
        }
    }
}

fn plain(source: &Path, code: &str) -> String {
    format!(
        "<pre><code class=\"language-{}\">{}</code></pre>",
        escape_html(language_of(source)),
        escape_html(code)
    )
}

/// Writes a self-contained HTML page for the source file.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn render_code_preview(source: &Path, out_path: &Path) -> Result<PathBuf, ProcessError> {
    let bytes = std::fs::read(source).map_err(|e| ProcessError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;
    let code = String::from_utf8_lossy(&bytes);

    let title = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let body = highlight(source, &code).unwrap_or_else(|| plain(source, &code));

    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
         <style>body{{margin:0;background:#f8f8f8}}pre{{margin:0;padding:1em;\
         font-family:monospace;white-space:pre;overflow:auto}}</style>\n</head>\n<body>\n\
         {body}\n</body>\n</html>\n",
        title = escape_html(&title),
        body = body,
    );

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProcessError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(out_path, html).map_err(|e| ProcessError::Io {
        path: out_path.to_path_buf(),
        source: e,
    })?;

    Ok(out_path.to_path_buf())
}
