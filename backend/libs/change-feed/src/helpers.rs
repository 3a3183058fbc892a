//! Helper functions for channel names and row filters

use crate::{ChangeFeedError, Result, RowFilter};

/// Prefix shared by every change channel
pub const CHANNEL_PREFIX: &str = "changes";

/// Build the transport channel name for a table
///
/// # Example
///
/// ```
/// use change_feed::build_channel_name;
///
/// assert_eq!(build_channel_name("videos"), "changes:videos");
/// ```
pub fn build_channel_name(table: &str) -> String {
    format!("{}:{}", CHANNEL_PREFIX, table)
}

/// Parse a channel name back into its table
///
/// # Example
///
/// ```
/// use change_feed::parse_channel_name;
///
/// assert_eq!(parse_channel_name("changes:stories").unwrap(), "stories");
/// assert!(parse_channel_name("cache:invalidate").is_err());
/// ```
pub fn parse_channel_name(channel: &str) -> Result<String> {
    match channel.split_once(':') {
        Some((prefix, table)) if prefix == CHANNEL_PREFIX && !table.is_empty() => {
            Ok(table.to_string())
        }
        _ => Err(ChangeFeedError::InvalidMessage(format!(
            "Invalid channel name: {}. Expected format: {}:<table>",
            channel, CHANNEL_PREFIX
        ))),
    }
}

/// Parse a `column=eq.value` row filter
///
/// # Example
///
/// ```
/// use change_feed::parse_row_filter;
///
/// let filter = parse_row_filter("user_id=eq.42").unwrap();
/// assert_eq!(filter.column, "user_id");
/// assert_eq!(filter.value, "42");
/// ```
pub fn parse_row_filter(raw: &str) -> Result<RowFilter> {
    let (column, rest) = raw.split_once('=').ok_or_else(|| {
        ChangeFeedError::InvalidMessage(format!("Invalid row filter: {}", raw))
    })?;

    let value = rest.strip_prefix("eq.").ok_or_else(|| {
        ChangeFeedError::InvalidMessage(format!(
            "Unsupported row filter operator in {}; only eq is supported",
            raw
        ))
    })?;

    if column.is_empty() {
        return Err(ChangeFeedError::InvalidMessage(format!(
            "Row filter without column: {}",
            raw
        )));
    }

    Ok(RowFilter::eq(column, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_round_trips_through_display() {
        let filter = RowFilter::eq("following_id", "abc");
        let parsed = parse_row_filter(&filter.to_string()).unwrap();
        assert_eq!(parsed, filter);
    }

    #[test]
    fn test_filter_rejects_other_operators() {
        assert!(parse_row_filter("views_count=gt.10").is_err());
        assert!(parse_row_filter("no-operator").is_err());
        assert!(parse_row_filter("=eq.1").is_err());
    }

    #[test]
    fn test_filter_value_may_contain_dots() {
        let filter = parse_row_filter("video_url=eq.https://cdn.example.com/a.mp4").unwrap();
        assert_eq!(filter.value, "https://cdn.example.com/a.mp4");
    }

    #[test]
    fn test_parse_channel_name_requires_table() {
        assert!(parse_channel_name("changes:").is_err());
        assert_eq!(parse_channel_name("changes:messages").unwrap(), "messages");
    }
}
