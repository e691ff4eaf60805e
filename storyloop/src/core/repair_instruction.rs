//! Builds the editorial instruction sent to the generator for one repair pass.

use std::fmt::Write as _;

use crate::core::types::{ChapterPosition, QcIssue, QcResult, Severity};

/// Render the repair instruction for `qc`.
///
/// Every critical issue is listed, followed by at most `max_major` major issues.
/// Minor issues are never sent; they do not justify a rewrite.
pub fn build_repair_instruction(qc: &QcResult, position: ChapterPosition, max_major: usize) -> String {
    let mut out = String::from("Revise the chapter below to fix the listed problems.\n");

    let critical: Vec<&QcIssue> = qc.issues_with(Severity::Critical).collect();
    let major: Vec<&QcIssue> = qc.issues_with(Severity::Major).take(max_major).collect();

    if !critical.is_empty() {
        out.push_str("\nCritical issues (all must be fixed):\n");
        push_issues(&mut out, &critical);
    }
    if !major.is_empty() {
        out.push_str("\nMajor issues:\n");
        push_issues(&mut out, &major);
    }

    out.push_str("\nEditorial constraints:\n");
    out.push_str("- Preserve the plot, the character voices and the narrative style.\n");
    out.push_str("- Rewrite only the passages that contain the problems above; leave the rest unchanged.\n");
    out.push_str("- Return the complete revised chapter text and nothing else.\n");
    if position.is_final() {
        out.push_str("- This is the final chapter; the ending may resolve the story.\n");
    } else {
        let _ = writeln!(
            out,
            "- This is chapter {} of {}: do not use concluding language or wrap up the story.",
            position.index, position.total
        );
        out.push_str("- Keep the chapter's ending hook intact.\n");
    }
    out
}

fn push_issues(out: &mut String, issues: &[&QcIssue]) {
    for (n, issue) in issues.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{}] {}",
            n + 1,
            issue.category.as_str(),
            issue.description.trim()
        );
        if let Some(fix) = issue.suggested_fix.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "   Suggested fix: {fix}");
        }
        if let Some(loc) = issue.location.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "   Location: {loc}");
        }
    }
}
