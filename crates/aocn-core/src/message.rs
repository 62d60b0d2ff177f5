//! Human-readable notification text built from a diff.

use crate::events::{has_completed_all, CompletionEvent, EventSet};
use crate::{IdentityMapping, Snapshot};

pub const TRUNCATION_MARKER: &str = "...and more updates.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSettings {
    pub year: i32,
    pub total_days: u32,
    pub reward_role: Option<String>,
    pub max_len: usize,
}

/// Ordered notification lines plus the members who finished the event in this batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationBatch {
    pub lines: Vec<String>,
    pub finishers: Vec<String>,
}

impl NotificationBatch {
    /// One line per event; a member who newly completed every day gets the
    /// completion message right after their last line.
    pub fn build(
        diff: &[CompletionEvent],
        snapshot: &Snapshot,
        old_events: &EventSet,
        new_events: &EventSet,
        mapping: &IdentityMapping,
        settings: &MessageSettings,
    ) -> Self {
        let mut batch = Self::default();
        let mut iter = diff.iter().peekable();

        while let Some(event) = iter.next() {
            let display = display_member(&event.member_id, snapshot, mapping);
            batch.lines.push(format_event_line(event, &display));

            let last_for_member = iter
                .peek()
                .map_or(true, |next| next.member_id != event.member_id);
            if !last_for_member {
                continue;
            }

            let member_id = event.member_id.as_str();
            if has_completed_all(new_events, member_id, settings.total_days)
                && !has_completed_all(old_events, member_id, settings.total_days)
            {
                batch
                    .lines
                    .push(completion_message(member_id, &display, mapping, settings));
                batch.finishers.push(member_id.to_string());
            }
        }

        batch
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn render_truncated(&self, max_len: usize) -> String {
        truncate(&self.render(), max_len)
    }
}

pub fn format_event_line(event: &CompletionEvent, display: &str) -> String {
    let stars = if event.is_full_day() { "﹡﹡" } else { "﹡　" };
    format!("[{stars}] {display} solved Day #{}.", event.day)
}

/// Mention for linked members, else the leaderboard name, else an anonymous tag.
///
/// A linked id counts as known as-is; guild membership is not checked here.
/// A user who left the server renders as Discord's unknown-user mention.
pub fn display_member(member_id: &str, snapshot: &Snapshot, mapping: &IdentityMapping) -> String {
    if let Some(platform_id) = mapping.get(member_id) {
        return format!("<@{platform_id}>");
    }

    snapshot
        .member(member_id)
        .and_then(|m| m.name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("(anonymous user #{member_id})"))
}

pub fn completion_message(
    member_id: &str,
    display: &str,
    mapping: &IdentityMapping,
    settings: &MessageSettings,
) -> String {
    let headline = format!(
        ":christmas_tree: {display} has completed all {} days of Advent of Code {}!",
        settings.total_days, settings.year
    );
    let linked = mapping.contains_key(member_id);

    match (&settings.reward_role, linked) {
        (Some(role), true) => format!("{headline} They have been given the <@&{role}> role."),
        (Some(role), false) => format!(
            "{headline} Link your AoC account with `/link_aoc` to receive the <@&{role}> role."
        ),
        (None, true) => headline,
        (None, false) => format!("{headline} Link your AoC account with `/link_aoc` to show up by name."),
    }
}

/// Over-long text is cut to a third of `max_len` so a truncated batch stays readable.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    let budget = max_len.saturating_sub(TRUNCATION_MARKER.len());
    let mut end = 0;
    for (count, (idx, ch)) in text.char_indices().enumerate() {
        if count >= max_len / 3 || idx + ch.len_utf8() > budget {
            break;
        }
        end = idx + ch.len_utf8();
    }

    let mut out = format!("{}{}", &text[..end], TRUNCATION_MARKER);
    if out.len() > max_len {
        let mut cut = max_len;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}
