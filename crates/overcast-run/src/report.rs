//! Static HTML report per run.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use overcast_core::error::SinkError;
use overcast_core::sinks::{Reporter, RunSummary};
use overcast_core::timestamp::PAYLOAD_FORMAT;

pub struct HtmlReporter;

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

/// Path relative to the run directory, with forward slashes for the browser.
fn link(dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(dir).unwrap_or(path);
    let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    escape(&parts.join("/"))
}

pub fn render_html(summary: &RunSummary<'_>) -> String {
    let dir = summary.layout.dir();
    let when = summary.timestamp.format(PAYLOAD_FORMAT).to_string();
    let mut html = String::new();

    // Writing into a String cannot fail.
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Cloud coverage: {district} {when}</title>\n\
         <style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #ccc;padding:4px 10px}}img{{max-width:480px;margin:4px}}</style>\n\
         </head>\n<body>\n<h1>Cloud coverage for {district}</h1>\n<p>Normalized time: {when}</p>\n",
        district = escape(summary.district),
        when = escape(&when),
    );

    html.push_str("<table>\n<tr><th>Region</th><th>Cloud coverage</th><th>Type</th></tr>\n");
    for record in summary.records {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&record.region_name),
            escape(&record.cloud_percentage),
            escape(&record.classification_type)
        );
    }
    html.push_str("</table>\n");

    let _ = write!(
        html,
        "<h2>Captures</h2>\n<a href=\"{full}\"><img src=\"{full}\" alt=\"full capture\"></a>\n\
         <a href=\"{cropped}\"><img src=\"{cropped}\" alt=\"cropped capture\"></a>\n",
        full = link(dir, &summary.layout.full_capture()),
        cropped = link(dir, &summary.layout.cropped_capture()),
    );

    if !summary.visualizations.is_empty() {
        html.push_str("<h2>Masked regions</h2>\n");
        for (name, path) in summary.visualizations {
            let _ = writeln!(
                html,
                "<figure><img src=\"{}\" alt=\"{name}\"><figcaption>{name}</figcaption></figure>",
                link(dir, path),
                name = escape(name)
            );
        }
    }

    let _ = write!(
        html,
        "<h2>Payload</h2>\n<pre>{}</pre>\n</body>\n</html>\n",
        escape(summary.json)
    );
    html
}

impl Reporter for HtmlReporter {
    fn render(&mut self, summary: &RunSummary<'_>) -> Result<PathBuf, SinkError> {
        let path = summary.layout.report();
        fs::write(&path, render_html(summary))
            .map_err(|e| SinkError::Reporting(format!("cannot write {}: {e}", path.display())))?;
        Ok(path)
    }
}
