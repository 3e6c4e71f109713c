//! Self-contained documents for static file sets.
//!
//! Static projects skip the sandbox: stylesheets and scripts are inlined into
//! the entry document, which is then served as a `data:` URL.

use base64::Engine;
use previewkit_common::FileRecord;

const STYLE_EXTENSIONS: &[&str] = &["css"];
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs"];

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

fn is_html(file: &FileRecord) -> bool {
    matches!(file.extension().as_deref(), Some("html") | Some("htm"))
}

fn has_extension(file: &FileRecord, extensions: &[&str]) -> bool {
    file.extension()
        .is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// The document a static preview renders: the shallowest `index.html`,
/// else the shallowest HTML file, ties broken by path
pub fn find_entry_document(files: &[FileRecord]) -> Option<&FileRecord> {
    files
        .iter()
        .filter(|f| is_html(f))
        .min_by(|a, b| {
            let rank = |f: &FileRecord| (f.file_name() != "index.html", depth(&f.path));
            rank(a).cmp(&rank(b)).then_with(|| a.path.cmp(&b.path))
        })
}

fn collect(files: &[FileRecord], extensions: &[&str]) -> String {
    let mut matching: Vec<&FileRecord> = files
        .iter()
        .filter(|f| has_extension(f, extensions))
        .collect();
    matching.sort_by(|a, b| a.path.cmp(&b.path));
    matching
        .iter()
        .map(|f| f.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Insert `fragment` before the first (or last) case-insensitive `anchor`
fn insert_before(document: &str, anchor: &str, fragment: &str, last: bool) -> Option<String> {
    let lower = document.to_ascii_lowercase();
    let at = if last { lower.rfind(anchor) } else { lower.find(anchor) }?;
    let mut out = String::with_capacity(document.len() + fragment.len());
    out.push_str(&document[..at]);
    out.push_str(fragment);
    out.push_str(&document[at..]);
    Some(out)
}

/// Build one renderable document from a static file set.
///
/// With no stylesheets or scripts the entry document is returned unchanged.
pub fn assemble_document(files: &[FileRecord]) -> String {
    let css = collect(files, STYLE_EXTENSIONS);
    let js = collect(files, SCRIPT_EXTENSIONS).replace("</script", "<\\/script");

    let style = if css.is_empty() {
        String::new()
    } else {
        format!("<style>\n{}\n</style>\n", css)
    };
    let script = if js.is_empty() {
        String::new()
    } else {
        format!("<script>\n{}\n</script>\n", js)
    };

    let Some(entry) = find_entry_document(files) else {
        return format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n{}</head>\n<body>\n{}</body>\n</html>\n",
            style, script
        );
    };

    let mut document = entry.content.clone();
    if !style.is_empty() {
        document = insert_before(&document, "</head>", &style, false)
            .unwrap_or_else(|| format!("{}{}", style, document));
    }
    if !script.is_empty() {
        document = insert_before(&document, "</body>", &script, true)
            .unwrap_or_else(|| format!("{}{}", document, script));
    }
    document
}

/// Encode a document as a `data:text/html` URL
pub fn to_data_url(document: &str) -> String {
    format!(
        "data:text/html;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(document.as_bytes())
    )
}
