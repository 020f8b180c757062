//! MarkdownV2 rendering of room records.

use bililive_core::RoomRecord;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use teloxide::utils::markdown::{escape, escape_link_url};

const LIVE_MARKER: &str = "[🟢]";
const ENDED_MARKER: &str = "[🟠]";
const UNKNOWN_MARKER: &str = "[❓]";

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Public page of a live room.
pub fn room_url(room_id: &str) -> String {
    format!("https://live.bilibili.com/{}", room_id)
}

/// Public space page of a user.
pub fn space_url(user_id: &str) -> String {
    format!("https://space.bilibili.com/{}", user_id)
}

/// Format an instant in the display zone, suffixed with the zone name.
pub fn format_time(time: DateTime<Utc>, tz: Tz) -> String {
    format!("{} {}", time.with_timezone(&tz).format(TIME_FORMAT), tz.name())
}

/// Format a duration as `H:MM:SS`; negative durations clamp to zero.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

/// Text of the session announcement.
///
/// The header line (marker, name, titles newest first, area) links to the room.
/// Start time always follows; stop time and duration only once ended.
pub fn notification_text<H>(record: &RoomRecord<H>, tz: Tz) -> String {
    let living = record.is_living == Some(true);

    let mut header = String::from(if living { LIVE_MARKER } else { ENDED_MARKER });
    header.push_str(record.display_name.as_deref().unwrap_or(&record.room_id));
    header.push_str(": ");
    header.push_str(record.current_title.as_deref().unwrap_or_default());
    for title in record.title_history.iter().rev() {
        header.push_str(" ⬅️ ");
        header.push_str(title);
    }
    header.push('\n');
    if let Some(area) = &record.area {
        header.push_str(&format!("Area: {}", area));
    }

    let mut text = format!(
        "[{}]({})\n",
        escape(&header),
        escape_link_url(&room_url(&record.room_id))
    );

    if let Some(start) = record.session_start {
        text.push_str(&escape(&format!("Started: {}\n", format_time(start, tz))));
    }
    if !living {
        if let Some(stop) = record.session_stop {
            text.push_str(&escape(&format!("Ended: {}\n", format_time(stop, tz))));
        }
        if let Some(duration) = record.session_duration() {
            text.push_str(&escape(&format!("Duration: {}\n", format_duration(duration))));
        }
    }
    text
}

/// One `/list` entry. Empty for disabled rooms.
pub fn room_info_text<H>(record: &RoomRecord<H>, tz: Tz) -> String {
    if !record.is_valid {
        return String::new();
    }

    let room_link = format!(
        "[{}]({})",
        escape(&format!("Room {}", record.room_id)),
        escape_link_url(&room_url(&record.room_id))
    );

    let Some(living) = record.is_living else {
        return format!("{}\n  └ {}\n", escape(&format!("{}Unknown:", UNKNOWN_MARKER)), room_link);
    };

    let status = if living {
        format!("{}Live: ", LIVE_MARKER)
    } else {
        format!("{}Offline: ", ENDED_MARKER)
    };
    let mut text = escape(&format!(
        "{}{}\n",
        status,
        record.display_name.as_deref().unwrap_or_default()
    ));

    text.push_str(&format!("  ├ {}\n", room_link));
    if let Some(user_id) = &record.user_id {
        text.push_str(&format!(
            "  ├ [{}]({})\n",
            escape(&format!("Space {}", user_id)),
            escape_link_url(&space_url(user_id))
        ));
    }
    if !living {
        let stopped = match record.session_stop {
            Some(stop) => format_time(stop, tz),
            None => "not recorded".to_string(),
        };
        text.push_str(&escape(&format!("  ├ Last stream ended: {}\n", stopped)));
    }
    text.push_str(&escape(&format!(
        "  └ Title: {}\n",
        record.current_title.as_deref().unwrap_or_default()
    )));
    text
}

/// The whole `/list` reply.
pub fn room_list_text<H>(records: &[RoomRecord<H>], tz: Tz) -> String {
    let text: String = records.iter().map(|r| room_info_text(r, tz)).collect();
    if text.is_empty() {
        escape("No subscribed rooms.")
    } else {
        text
    }
}
