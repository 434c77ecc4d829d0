use crate::error::NboError;
use crate::types::{Event, EventTables};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Read normalized events from a JSON Lines file
pub fn read_events_jsonl(path: &Path) -> Result<Vec<Event>, NboError> {
    let file = std::fs::File::open(path)?;
    read_events(file)
}

/// Parse events from any reader. Blank lines are skipped, malformed ones are
/// skipped with a warning.
pub fn read_events<R: Read>(reader: R) -> Result<Vec<Event>, NboError> {
    let reader = BufReader::new(reader);
    let mut events = Vec::new();
    let mut skipped = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = idx + 1, error = %e, "skipping malformed event");
            }
        }
    }

    tracing::debug!(events = events.len(), skipped, "events read");
    Ok(events)
}

/// Split events into per-user domain tables
pub fn group_by_user(events: Vec<Event>) -> BTreeMap<String, EventTables> {
    let mut users: BTreeMap<String, EventTables> = BTreeMap::new();
    for event in events {
        users.entry(event.user_id.clone()).or_default().push(event);
    }
    users
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;
    use std::io::Write;

    const SAMPLE: &str = r#"{"user_id": "u1", "domain": "marketplace", "action_type": "view", "category": "Books", "timestamp": "2024-03-01T10:00:00Z"}

{"user_id": 7, "domain": "payments", "brand_id": 99, "amount": -120.0}
not json at all
{"domain": "retail"}
{"user_id": "u1", "domain": "receipts", "category": "Food", "brand_id": "b1", "amount": 300}
"#;

    #[test]
    fn skips_blank_and_malformed_lines() {
        let events = read_events(SAMPLE.as_bytes()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].user_id, "7");
        assert_eq!(events[1].brand_id.as_deref(), Some("99"));
    }

    #[test]
    fn groups_by_user_and_domain() {
        let users = group_by_user(read_events(SAMPLE.as_bytes()).unwrap());
        assert_eq!(users.keys().collect::<Vec<_>>(), vec!["7", "u1"]);
        let u1 = &users["u1"];
        assert_eq!(u1.marketplace.len(), 1);
        assert_eq!(u1.receipts.len(), 1);
        assert_eq!(u1.receipts[0].domain, Domain::Receipts);
        assert_eq!(users["7"].payments.len(), 1);
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let events = read_events_jsonl(file.path()).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_events_jsonl(Path::new("/nonexistent/events.jsonl")).unwrap_err();
        assert!(matches!(err, NboError::Io(_)));
    }

    #[test]
    fn empty_input() {
        assert!(read_events("".as_bytes()).unwrap().is_empty());
        assert!(group_by_user(Vec::new()).is_empty());
    }
}
