//! Webhook payload truncation.
//!
//! Webhook endpoints reject bodies over a byte limit. Oversized content is
//! cut on a UTF-8 character boundary and suffixed with a notice.

/// Byte budget for webhook message content.
pub const WEBHOOK_BYTE_BUDGET: usize = 3500;

/// Bytes reserved below the budget for the truncation notice.
const NOTICE_RESERVE: usize = 200;

/// Maximum backward steps when searching for a character boundary.
const MAX_BOUNDARY_PROBE: usize = 10;

/// Character count kept when no boundary is found near the cut.
const FALLBACK_CHARS: usize = 800;

fn notice(report_hint: Option<&str>) -> String {
    match report_hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => format!("\n\n...(message truncated, full report: {hint})"),
        None => "\n\n...(message truncated)".to_string(),
    }
}

/// Largest char boundary `<= idx`.
fn floor_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate `content` to at most `budget` bytes of valid UTF-8.
///
/// Content within budget is returned unchanged. Otherwise the cut lands at
/// `budget - 200` bytes, probing back at most 10 bytes for a character
/// boundary (falling back to the first 800 characters), and a truncation
/// notice is appended.
pub fn truncate_for_webhook(content: &str, budget: usize, report_hint: Option<&str>) -> String {
    if content.len() <= budget {
        return content.to_string();
    }

    let mut suffix = notice(report_hint);
    if suffix.len() > budget {
        suffix = notice(None);
    }
    if suffix.len() > budget {
        return content[..floor_boundary(content, budget)].to_string();
    }

    let cut = budget.saturating_sub(NOTICE_RESERVE);
    let probed = (0..=MAX_BOUNDARY_PROBE)
        .take_while(|step| *step <= cut)
        .map(|step| cut - step)
        .find(|idx| content.is_char_boundary(*idx));

    let mut end = match probed {
        Some(idx) => idx,
        None => content
            .char_indices()
            .nth(FALLBACK_CHARS)
            .map_or(content.len(), |(idx, _)| idx),
    };

    // A long report hint can eat into the reserve.
    let max_prefix = budget - suffix.len();
    if end > max_prefix {
        end = floor_boundary(content, max_prefix);
    }

    let mut out = String::with_capacity(end + suffix.len());
    out.push_str(&content[..end]);
    out.push_str(&suffix);
    out
}
