//! Unified diff previews for `scaffold diff` and plan output.

use serde::Serialize;
use similar::TextDiff;

use crate::intent::Intents;
use crate::oracle::ReconciliationPlan;

/// A single file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub unified_diff: String,
}

/// Unified diff of `before` → `after` with `a/` and `b/` headers.
pub fn unified(path: &str, before: &str, after: &str) -> String {
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(before, after)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

/// Diffs for every text write in the plan: updates against disk, creates
/// against nothing.
///
/// No files are read or written.
pub fn plan_diffs(plan: &ReconciliationPlan, intents: &Intents) -> Vec<FileDiff> {
    let mut diffs = Vec::new();
    for created in plan.create.iter().filter(|c| !c.is_dir) {
        let Some(text) = intents.get(&created.path).and_then(|i| i.text()) else {
            continue;
        };
        diffs.push(FileDiff {
            path: created.path.clone(),
            unified_diff: unified(&created.path, "", text),
        });
    }
    for update in &plan.update {
        if let Some(diff) = &update.diff {
            diffs.push(FileDiff {
                path: update.path.clone(),
                unified_diff: diff.clone(),
            });
        }
    }
    diffs.sort_by(|a, b| a.path.cmp(&b.path));
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_change_produces_unified_diff() {
        let diff = unified("src/main.py", "print(1)\n", "print(2)\n");
        assert!(diff.contains("--- a/src/main.py"));
        assert!(diff.contains("+++ b/src/main.py"));
        assert!(diff.contains("@@"));
        assert!(diff.contains("-print(1)"));
        assert!(diff.contains("+print(2)"));
    }

    #[test]
    fn identical_text_has_no_hunks() {
        let diff = unified("a.txt", "same\n", "same\n");
        assert!(!diff.contains("@@"));
    }
}
