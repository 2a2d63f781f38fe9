use super::types::Hunk;
use super::PrError;

/// Parse a single file's unified diff into its hunks.
///
/// The input is the `patch` field of GitHub's pull-request files endpoint,
/// which starts directly at the first `@@` header. File headers
/// (`diff --git`, `---`, `+++`, `index`) are tolerated and skipped so a
/// one-file `git diff` works as well.
///
/// Hunks start with: @@ -{old_start},{old_count} +{new_start},{new_count} @@
///
/// Lines are prefixed with:
///   '+' for additions
///   '-' for deletions
///   ' ' for context (unchanged)
pub fn parse_patch(patch: &str) -> Result<Vec<Hunk>, PrError> {
    if patch.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in patch.lines() {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(line)?;
            current = Some(Hunk {
                old_start,
                old_count,
                new_start,
                new_count,
                header: line.to_string(),
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            // file headers before the first hunk
            continue;
        };

        if line.starts_with('+') || line.starts_with('-') || line.starts_with(' ') {
            hunk.lines.push(line.to_string());
        } else if line.is_empty() {
            // some producers strip the space from blank context lines
            hunk.lines.push(" ".to_string());
        }
    }

    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    Ok(hunks)
}

/// Render hunks back into patch text.
pub fn render_hunks(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        out.push_str(&hunk.header);
        out.push('\n');
        for line in &hunk.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize), PrError> {
    let header = line
        .trim()
        .strip_prefix("@@")
        .ok_or_else(|| PrError::DiffParse("Invalid hunk header".to_string()))?;
    // drop the trailing "@@ fn context" section
    let header = header.split("@@").next().unwrap_or_default().trim();
    let mut parts = header.split_whitespace();
    let old_part = parts
        .next()
        .ok_or_else(|| PrError::DiffParse("Missing old range".to_string()))?;
    let new_part = parts
        .next()
        .ok_or_else(|| PrError::DiffParse("Missing new range".to_string()))?;

    let (old_start, old_count) = parse_range(old_part, '-')?;
    let (new_start, new_count) = parse_range(new_part, '+')?;

    Ok((old_start, old_count, new_start, new_count))
}

fn parse_range(part: &str, prefix: char) -> Result<(usize, usize), PrError> {
    let range = part
        .strip_prefix(prefix)
        .ok_or_else(|| PrError::DiffParse("Invalid range prefix".to_string()))?;
    let (start_str, count_str) = match range.split_once(',') {
        Some((start, count)) => (start, count),
        None => (range, "1"),
    };
    let start = start_str
        .parse::<usize>()
        .map_err(|_| PrError::DiffParse(format!("Invalid range start in {}", part)))?;
    let count = count_str
        .parse::<usize>()
        .map_err(|_| PrError::DiffParse(format!("Invalid range count in {}", part)))?;
    Ok((start, count))
}
