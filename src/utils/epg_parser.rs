//! Streaming XMLTV guide parser
//!
//! Guide documents from provider panels routinely run to tens of MB, so the
//! parser works in a single quick-xml pass and applies the retention window
//! while reading, bounding peak memory to the retained set.

use chrono::{DateTime, Duration, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};

use crate::errors::{SourceError, SourceResult};
use crate::models::{EpgChannel, EpgData, EpgProgram};
use crate::utils::time::parse_xmltv_timestamp;

/// Parse an XMLTV document into channels and retained programs.
///
/// The only structural requirement is the `<tv>` root element; its absence is
/// a hard parse failure. Channels are deduplicated by id with later entries
/// winning. Programs missing a parseable start or stop are dropped silently.
/// Retention keeps programs overlapping the window from one day before `now`
/// to `retention_days` after it.
pub fn parse_guide(
    content: &str,
    retention_days: i64,
    now: DateTime<Utc>,
) -> SourceResult<EpgData> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let cutoff_start = (now - Duration::days(1)).timestamp();
    let cutoff_end = (now + Duration::days(retention_days)).timestamp();

    let mut saw_root = false;
    let mut channels: BTreeMap<String, EpgChannel> = BTreeMap::new();
    let mut programs: Vec<EpgProgram> = Vec::new();

    let mut current_channel: Option<PendingChannel> = None;
    let mut current_program: Option<PendingProgram> = None;
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e.name())?;
                match name.as_str() {
                    "tv" => saw_root = true,
                    "channel" => {
                        let attrs = parse_attributes(e);
                        current_channel = Some(PendingChannel {
                            id: attrs.get("id").cloned().unwrap_or_default(),
                            name: None,
                            logo: None,
                        });
                    }
                    "programme" => {
                        let attrs = parse_attributes(e);
                        current_program = Some(PendingProgram {
                            channel: attrs.get("channel").cloned().unwrap_or_default(),
                            start: attrs.get("start").cloned().unwrap_or_default(),
                            stop: attrs.get("stop").cloned().unwrap_or_default(),
                            title: None,
                            description: None,
                            category: None,
                        });
                    }
                    _ => {}
                }
                current_text.clear();
            }

            Ok(Event::End(ref e)) => {
                let name = element_name(e.name())?;
                match name.as_str() {
                    "display-name" => {
                        if let Some(ref mut channel) = current_channel {
                            if channel.name.is_none() && !current_text.trim().is_empty() {
                                channel.name = Some(current_text.trim().to_string());
                            }
                        }
                    }
                    "title" => {
                        if let Some(ref mut program) = current_program {
                            if !current_text.trim().is_empty() {
                                program.title = Some(current_text.trim().to_string());
                            }
                        }
                    }
                    "desc" => {
                        if let Some(ref mut program) = current_program {
                            if !current_text.trim().is_empty() {
                                program.description = Some(current_text.trim().to_string());
                            }
                        }
                    }
                    "category" => {
                        if let Some(ref mut program) = current_program {
                            if program.category.is_none() && !current_text.trim().is_empty() {
                                program.category = Some(current_text.trim().to_string());
                            }
                        }
                    }
                    "channel" => {
                        if let Some(pending) = current_channel.take() {
                            if !pending.id.is_empty() {
                                // Last entry wins on duplicate ids
                                channels.insert(
                                    pending.id.clone(),
                                    EpgChannel {
                                        name: pending.name.unwrap_or_else(|| pending.id.clone()),
                                        id: pending.id,
                                        logo: pending.logo,
                                    },
                                );
                            }
                        }
                    }
                    "programme" => {
                        if let Some(pending) = current_program.take() {
                            if let Some(program) =
                                pending.into_program(cutoff_start, cutoff_end)
                            {
                                programs.push(program);
                            }
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }

            Ok(Event::Empty(ref e)) => {
                let name = element_name(e.name())?;
                if name == "icon" {
                    let attrs = parse_attributes(e);
                    if let Some(src) = attrs.get("src") {
                        if let Some(ref mut channel) = current_channel {
                            channel.logo = Some(src.clone());
                        }
                    }
                }
            }

            Ok(Event::Text(e)) => {
                let text = std::str::from_utf8(&e).map_err(|e| {
                    SourceError::parse("xmltv", format!("invalid UTF-8 in text: {e}"))
                })?;
                current_text.push_str(text);
            }

            Ok(Event::CData(e)) => {
                let text = std::str::from_utf8(&e).map_err(|e| {
                    SourceError::parse("xmltv", format!("invalid UTF-8 in CDATA: {e}"))
                })?;
                current_text.push_str(text);
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(SourceError::parse("xmltv", format!("XML parsing error: {e}")));
            }

            _ => {}
        }
    }

    if !saw_root {
        return Err(SourceError::parse(
            "xmltv",
            "document has no <tv> root element",
        ));
    }

    let programs_by_channel = group_programs(&programs);

    Ok(EpgData {
        channels,
        programs,
        programs_by_channel,
    })
}

/// Build the channel -> sorted-program-list index downstream consumers query
fn group_programs(programs: &[EpgProgram]) -> BTreeMap<String, Vec<EpgProgram>> {
    let mut grouped: BTreeMap<String, Vec<EpgProgram>> = BTreeMap::new();
    for program in programs {
        grouped
            .entry(program.channel_id.clone())
            .or_default()
            .push(program.clone());
    }
    for list in grouped.values_mut() {
        list.sort_by_key(|p| p.start_ts);
    }
    grouped
}

struct PendingChannel {
    id: String,
    name: Option<String>,
    logo: Option<String>,
}

struct PendingProgram {
    channel: String,
    start: String,
    stop: String,
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
}

impl PendingProgram {
    /// Finalize a programme record, dropping it when either timestamp is
    /// unparseable or it lies entirely outside the retention window.
    fn into_program(self, cutoff_start: i64, cutoff_end: i64) -> Option<EpgProgram> {
        let start_ts = parse_xmltv_timestamp(&self.start)?.timestamp();
        let stop_ts = parse_xmltv_timestamp(&self.stop)?.timestamp();
        if start_ts >= stop_ts {
            return None;
        }
        if stop_ts < cutoff_start || start_ts > cutoff_end {
            return None;
        }

        Some(EpgProgram {
            channel_id: self.channel,
            start: self.start,
            stop: self.stop,
            start_ts,
            stop_ts,
            title: self.title.unwrap_or_else(|| "Unknown Program".to_string()),
            description: self.description,
            category: self.category,
        })
    }
}

fn element_name(name: QName) -> SourceResult<String> {
    std::str::from_utf8(name.as_ref())
        .map(|s| s.to_string())
        .map_err(|e| SourceError::parse("xmltv", format!("invalid UTF-8 in element name: {e}")))
}

/// Parse XML attributes into a HashMap
fn parse_attributes(element: &BytesStart) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for attr in element.attributes().flatten() {
        if let (Ok(key), Ok(value)) = (
            std::str::from_utf8(attr.key.as_ref()),
            std::str::from_utf8(&attr.value),
        ) {
            attrs.insert(key.to_string(), value.to_string());
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn sample_doc() -> String {
        // Two channels (one duplicated id with different name), three valid
        // programs inside the window, one missing stop, one far in the past.
        r#"<?xml version="1.0" encoding="UTF-8"?>
<tv generator-info-name="test">
  <channel id="news.one">
    <display-name>Stale News One</display-name>
  </channel>
  <channel id="news.one">
    <display-name>News One</display-name>
    <icon src="http://logo.example/news.png"/>
  </channel>
  <channel id="sports.two">
    <display-name>Sports Two</display-name>
  </channel>
  <programme start="20260115130000 +0000" stop="20260115140000 +0000" channel="news.one">
    <title>Evening Report</title>
    <desc>Headlines of the day</desc>
    <category>News</category>
  </programme>
  <programme start="20260115120000" stop="20260115130000" channel="news.one">
    <title>Midday Report</title>
  </programme>
  <programme start="20260115150000" stop="20260115160000" channel="sports.two">
    <title>Match Highlights</title>
  </programme>
  <programme start="20260115170000" channel="sports.two">
    <title>No Stop Attribute</title>
  </programme>
  <programme start="20250101100000" stop="20250101110000" channel="news.one">
    <title>Ancient History</title>
  </programme>
</tv>"#
            .to_string()
    }

    #[test]
    fn test_parse_counts_and_dedup() {
        let data = parse_guide(&sample_doc(), 7, fixed_now()).unwrap();

        assert_eq!(data.channels.len(), 2);
        // Later duplicate wins
        let news = &data.channels["news.one"];
        assert_eq!(news.name, "News One");
        assert_eq!(news.logo.as_deref(), Some("http://logo.example/news.png"));

        // Missing-stop and out-of-window programs are dropped silently
        assert_eq!(data.programs.len(), 3);
    }

    #[test]
    fn test_grouped_index_is_sorted_by_start() {
        let data = parse_guide(&sample_doc(), 7, fixed_now()).unwrap();

        let news_programs = &data.programs_by_channel["news.one"];
        assert_eq!(news_programs.len(), 2);
        // Document order had 13:00 before 12:00; the index is time-sorted
        assert_eq!(news_programs[0].title, "Midday Report");
        assert_eq!(news_programs[1].title, "Evening Report");
        assert!(news_programs[0].start_ts < news_programs[1].start_ts);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let doc = sample_doc();
        let first = parse_guide(&doc, 7, fixed_now()).unwrap();
        let second = parse_guide(&doc, 7, fixed_now()).unwrap();

        assert_eq!(first, second);
        // Byte-for-byte identical serialization, ordering included
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_retention_window_bounds() {
        let now = fixed_now();
        let data = parse_guide(&sample_doc(), 7, now).unwrap();

        let cutoff_start = (now - Duration::days(1)).timestamp();
        let cutoff_end = (now + Duration::days(7)).timestamp();
        for program in &data.programs {
            assert!(program.stop_ts >= cutoff_start);
            assert!(program.start_ts <= cutoff_end);
            assert!(program.start_ts < program.stop_ts);
        }
    }

    #[test]
    fn test_program_ending_within_window_is_retained() {
        // Started 30 hours ago but still running: overlaps the window
        let doc = r#"<tv>
  <programme start="20260114060000" stop="20260115130000" channel="c1">
    <title>Marathon</title>
  </programme>
</tv>"#;
        let data = parse_guide(doc, 7, fixed_now()).unwrap();
        assert_eq!(data.programs.len(), 1);
    }

    #[test]
    fn test_missing_root_is_hard_failure() {
        let err = parse_guide("<guide></guide>", 7, fixed_now()).unwrap_err();
        assert!(err.to_string().contains("no <tv> root"));
    }

    #[test]
    fn test_inverted_interval_is_dropped() {
        let doc = r#"<tv>
  <programme start="20260115140000" stop="20260115130000" channel="c1">
    <title>Backwards</title>
  </programme>
</tv>"#;
        let data = parse_guide(doc, 7, fixed_now()).unwrap();
        assert!(data.programs.is_empty());
    }
}
