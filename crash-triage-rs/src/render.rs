//! # Issue Rendering
//!
//! Turns a fingerprinted report into the title and markdown body of a new
//! tracked item. The body embeds the fingerprint marker that later
//! reconciliation searches for, so the marker always comes first.

use std::fmt::Write;

use crate::fingerprint::Fingerprint;
use crate::identity::RepoIdentity;
use crate::locator::SourceLocation;
use crate::report::ErrorReport;
use crate::tracker::IssueDraft;

/// Longest value shown in a diagram node
const MERMAID_VALUE_LIMIT: usize = 60;

/// Builds the item to create for a report never seen before
pub fn render_issue(
    report: &ErrorReport,
    fingerprint: &Fingerprint,
    identity: &RepoIdentity,
    labels: &[String],
) -> IssueDraft {
    let location_url = report
        .location
        .as_ref()
        .map(|location| blob_url(location, identity));

    // `-->` would end the hidden comment early.
    let json = report.to_value().to_string().replace("-->", "--&gt;");
    let stack = report
        .full_report
        .as_deref()
        .or(report.stack.as_deref())
        .unwrap_or("N/A");

    let mut body = String::new();
    let _ = writeln!(body, "{}", fingerprint.marker());
    let _ = writeln!(body, "<!-- report json:\n{}\n-->", json);
    let _ = writeln!(body, "# Error report: {}", report.message);
    let _ = writeln!(body, "## Stack:\n```\n{}\n```\n", stack);
    body.push_str(&mermaid_diagram(report, &identity.build_id, location_url.as_deref()));

    IssueDraft {
        title: format!("error: {}", report.message),
        body,
        labels: labels.to_vec(),
    }
}

/// Link to the located line at the reported build
pub fn blob_url(location: &SourceLocation, identity: &RepoIdentity) -> String {
    let mut path = location.file.replacen("file://", "", 1);
    if let Some(workdir) = identity.workdir.as_deref().filter(|w| !w.is_empty()) {
        path = path.replacen(workdir, "", 1);
    }

    format!(
        "https://github.com/{}/{}/blob/{}{}#L{}",
        identity.owner.trim(),
        identity.repo,
        identity.build_id,
        path,
        location.line
    )
}

/// Mermaid class diagram of the report, its process snapshot and location
pub fn mermaid_diagram(report: &ErrorReport, build_id: &str, location_url: Option<&str>) -> String {
    let timestamp = report.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let memory = report.process.memory_usage.as_ref();
    let rss = memory.map_or_else(|| "N/A".to_string(), |m| m.rss.to_string());
    let virtual_memory = memory.map_or_else(|| "N/A".to_string(), |m| m.virtual_memory.to_string());

    let mut diagram = String::from("```mermaid\nclassDiagram\n");
    let _ = write!(
        diagram,
        "    class ErrorReport {{\n      +message: \"{}\"\n      +name: \"{}\"\n      +timestamp: \"{}\"\n      +type: \"{}\"\n      +commitHash: \"{}\"\n    }}\n",
        escape(Some(&report.message)),
        escape(Some(&report.name)),
        escape(Some(&timestamp)),
        escape(Some(&report.error_type)),
        build_id
    );
    let _ = write!(
        diagram,
        "    class ProcessInfo {{\n      +uptime: {}\n      +cwd: \"{}\"\n    }}\n",
        report.process.uptime,
        escape(report.process.cwd.as_deref())
    );
    let _ = write!(
        diagram,
        "    class MemoryUsage {{\n      +rss: {}\n      +virtual: {}\n    }}\n\n",
        rss, virtual_memory
    );
    diagram.push_str("    ErrorReport *-- ProcessInfo\n    ProcessInfo *-- MemoryUsage\n");

    if let (Some(location), Some(url)) = (report.location.as_ref(), location_url) {
        let _ = write!(
            diagram,
            "\n    class Location {{\n      +file: \"{}\"\n      +line: \"{}\"\n      +column: \"{}\"\n    }}\n    ErrorReport *-- Location\n    click Location href \"{}\" \"Go to code\"\n",
            escape(Some(&location.file)),
            escape(Some(&location.line)),
            escape(Some(&location.column)),
            url
        );
    }

    diagram.push_str("```");
    diagram
}

/// Makes a value safe for a quoted Mermaid attribute
fn escape(value: Option<&str>) -> String {
    let Some(value) = value else {
        return "N/A".to_string();
    };

    let mut out = String::with_capacity(value.len());
    let mut in_break = false;
    for c in value.chars() {
        match c {
            '\r' | '\n' => {
                if !in_break {
                    out.push(' ');
                }
                in_break = true;
            }
            '"' => {
                out.push('\'');
                in_break = false;
            }
            other => {
                out.push(other);
                in_break = false;
            }
        }
    }

    out.chars().take(MERMAID_VALUE_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Failure, MemoryUsage, ProcessInfo};
    use chrono::{TimeZone, Utc};

    fn identity() -> RepoIdentity {
        RepoIdentity::new("owner", "repo", "abc123").with_workdir("/home/user/project")
    }

    fn location(file: &str, line: &str) -> SourceLocation {
        SourceLocation {
            file: file.to_string(),
            line: line.to_string(),
            column: "15".to_string(),
            frame_text: format!("at main ({}:{}:15)", file, line),
        }
    }

    fn report(message: &str, location: Option<SourceLocation>) -> ErrorReport {
        ErrorReport::from_failure(
            &Failure::from(message),
            location,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ProcessInfo {
                uptime: 100.0,
                memory_usage: Some(MemoryUsage { rss: 1000, virtual_memory: 2000 }),
                cwd: Some("/home/user/project".into()),
            },
        )
    }

    #[test]
    fn test_blob_url_from_path() {
        let url = blob_url(&location("/home/user/project/src/index.js", "42"), &identity());
        assert_eq!(url, "https://github.com/owner/repo/blob/abc123/src/index.js#L42");
    }

    #[test]
    fn test_blob_url_from_file_url() {
        let identity = RepoIdentity::new("owner", "repo", "def456").with_workdir("/home/user/project");
        let url = blob_url(&location("file:///home/user/project/src/index.js", "10"), &identity);
        assert_eq!(url, "https://github.com/owner/repo/blob/def456/src/index.js#L10");
    }

    #[test]
    fn test_mermaid_shape() {
        let diagram = mermaid_diagram(&report("Test error", None), "abc123", None);
        assert!(diagram.starts_with("```mermaid"));
        assert!(diagram.contains("classDiagram"));
        assert!(diagram.contains("class ErrorReport"));
        assert!(diagram.contains("+message: \"Test error\""));
        assert!(diagram.contains("+commitHash: \"abc123\""));
        assert!(diagram.contains("+uptime: 100"));
        assert!(diagram.contains("+rss: 1000"));
        assert!(diagram.contains("ErrorReport *-- ProcessInfo"));
        assert!(!diagram.contains("class Location"));
        assert!(diagram.ends_with("```"));
    }

    #[test]
    fn test_mermaid_location_link() {
        let url = "https://github.com/owner/repo/blob/abc123/src/index.js#L42";
        let report = report("Test error", Some(location("/home/user/project/src/index.js", "42")));
        let diagram = mermaid_diagram(&report, "abc123", Some(url));

        assert!(diagram.contains("class Location"));
        assert!(diagram.contains("+line: \"42\""));
        assert!(diagram.contains("+column: \"15\""));
        assert!(diagram.contains("ErrorReport *-- Location"));
        assert!(diagram.contains(&format!("click Location href \"{}\" \"Go to code\"", url)));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(Some("Error with \"quotes\" and\r\n\nnewlines")), "Error with 'quotes' and newlines");
        assert_eq!(escape(None), "N/A");
        assert_eq!(escape(Some(&"x".repeat(100))).len(), MERMAID_VALUE_LIMIT);
    }

    #[test]
    fn test_missing_memory_shows_placeholder() {
        let mut report = report("boom", None);
        report.process.memory_usage = None;
        report.process.cwd = None;
        let diagram = mermaid_diagram(&report, "abc", None);
        assert!(diagram.contains("+rss: N/A"));
        assert!(diagram.contains("+cwd: \"N/A\""));
    }

    #[test]
    fn test_render_issue() {
        let fp = Fingerprint::from_hex("deadbeef");
        let report = report("Error: boom --> here\n at /home/user/project/src/a.js:3:1", None);
        let draft = render_issue(&report, &fp, &identity(), &["automated-error".to_string()]);

        assert_eq!(draft.title, "error: Error: boom --> here");
        assert!(draft.body.starts_with("<!-- hash: deadbeef -->\n"));
        assert!(draft.body.contains("# Error report: Error: boom --> here"));
        assert!(draft.body.contains("## Stack:\n```\nError: boom --> here\n at /home/user/project/src/a.js:3:1\n```"));
        assert!(draft.body.contains("```mermaid"));
        assert_eq!(draft.labels, vec!["automated-error"]);

        // The embedded JSON cannot close its comment early.
        let json_section = draft.body.split("<!-- report json:\n").nth(1).expect("json section");
        let json_line = json_section.lines().next().expect("json line");
        assert!(!json_line.contains("-->"));
        assert!(json_line.contains("--&gt;"));
    }
}
