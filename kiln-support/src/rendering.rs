//! Text rendering utilities for human-friendly error messages.
//!
//! Provides helpers to format type ancestries, per-hook outcome tables,
//! shortened type names and suggestions in error output.

/// Renders a chain of names joined by arrows.
///
/// Used for type ancestries (`Derived → Base`) and for cyclic
/// `extends` declarations.
///
/// # Examples
/// ```
/// use kiln_support::rendering::render_chain;
///
/// let chain = vec!["AuditedService", "Service", "AuditedService"];
/// let rendered = render_chain(&chain);
/// assert_eq!(rendered, "AuditedService → Service → AuditedService");
/// ```
pub fn render_chain(chain: &[impl AsRef<str>]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Renders one line per invoked member with an aligned status column.
///
/// ```text
/// [ok    ] Pool::flush
/// [failed] Pool::close  (cause: socket already closed)
/// ```
pub fn render_outcomes(entries: &[OutcomeEntry]) -> String {
    let mut result = String::new();
    let width = entries
        .iter()
        .map(|e| e.status.len())
        .max()
        .unwrap_or(0);

    for entry in entries {
        result.push_str(&format!(
            "[{:<width$}] {}",
            entry.status,
            entry.member,
            width = width,
        ));

        if let Some(ref cause) = entry.cause {
            result.push_str(&format!("  (cause: {cause})"));
        }

        result.push('\n');
    }

    result
}

/// A single row for [`render_outcomes`].
#[derive(Debug)]
pub struct OutcomeEntry {
    /// Short status label, e.g. "ok" or "failed"
    pub status: String,
    /// The member that was invoked
    pub member: String,
    /// Optional failure description
    pub cause: Option<String>,
}

/// Shortens a fully qualified type name for display.
///
/// ```
/// use kiln_support::rendering::shorten_type_name;
///
/// let short = shorten_type_name("my_app::services::user::UserService");
/// assert_eq!(short, "UserService");
///
/// let short = shorten_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>");
/// assert_eq!(short, "Arc<dyn Logger>");
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    // Keep only the last segment of every path:
    // "app::repo::Repository" → "Repository"
    // "Box<dyn app::Hook>" → "Box<dyn Hook>"
    // "(app::A, [app::B; 2])" → "(A, [B; 2])"

    let mut result = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut current_segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next(); // second ':'
                current_segment.clear(); // drop the path prefix
            }
            // Delimiters close a segment and are kept verbatim
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' => {
                result.push_str(&current_segment);
                result.push(ch);
                current_segment.clear();
            }
            _ => {
                current_segment.push(ch);
            }
        }
    }

    result.push_str(&current_segment);
    result
}

/// Suggests type names close to `requested` from `available`.
///
/// Substring matches rank first, then matches on the shortened name,
/// then names sharing a common prefix of at least three characters.
pub fn suggest_similar(
    requested: &str,
    available: &[&str],
    max_suggestions: usize,
) -> Vec<String> {
    let requested_lower = requested.to_lowercase();
    let requested_short = shorten_type_name(requested).to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter(|&&name| name != requested) // never suggest the key itself
        .filter_map(|&name| {
            let name_lower = name.to_lowercase();
            let name_short = shorten_type_name(name).to_lowercase();

            // Full-name substring (strongest)
            if name_lower.contains(&requested_lower)
                || requested_lower.contains(&name_lower)
            {
                return Some((name, 100));
            }

            // Short-name substring
            if name_short.contains(&requested_short)
                || requested_short.contains(&name_short)
            {
                return Some((name, 80));
            }

            // Shared prefix, scored by its length
            let common = name_short
                .chars()
                .zip(requested_short.chars())
                .take_while(|(a, b)| a == b)
                .count();

            if common >= 3 {
                return Some((name, common * 10));
            }

            None
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}
