use bulkops::{Id, Outcome};
use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored glyph for an outcome
pub fn glyph(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success => "✓".green().to_string(),
        Outcome::Failure { .. } => "✗".red().to_string(),
        Outcome::Skipped { .. } => "–".yellow().to_string(),
    }
}

/// Collapse sorted IDs into runs: `100-103, 107, 110-111`.
pub fn compact_ids(ids: &[Id]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(mut start) = iter.next() else {
        return "none".to_string();
    };
    let mut end = start;

    for id in iter {
        if end.checked_add(1) == Some(id) {
            end = id;
            continue;
        }
        parts.push(run_label(start, end));
        start = id;
        end = id;
    }
    parts.push(run_label(start, end));
    parts.join(", ")
}

fn run_label(start: Id, end: Id) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// Truncate a message for a single terminal line, keeping the start
pub fn truncate(msg: &str, max_len: usize) -> String {
    let first_line = msg.lines().next().unwrap_or_default();
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = first_line.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_ids() {
        assert_eq!(compact_ids(&[]), "none");
        assert_eq!(compact_ids(&[100]), "100");
        assert_eq!(compact_ids(&[100, 101, 102, 103]), "100-103");
        assert_eq!(
            compact_ids(&[110, 100, 101, 107, 111, 102]),
            "100-102, 107, 110-111"
        );
    }

    #[test]
    fn test_compact_ids_dedups() {
        assert_eq!(compact_ids(&[5, 5, 6]), "5-6");
    }

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("VM 100 is locked", 40), "VM 100 is locked");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("unable to find configuration", 10), "unable ...");
    }

    #[test]
    fn test_truncate_keeps_first_line() {
        assert_eq!(truncate("first\nsecond", 40), "first");
    }

    #[test]
    fn test_truncate_edge_cases() {
        assert_eq!(truncate("test", 3), "...");
        assert_eq!(truncate("", 10), "");
    }
}
