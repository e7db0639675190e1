//! Inter-bee-interval (IBI) accuracy: compare logged events against a
//! hand-annotated CSV of visits.

use crate::port::PortId;
use crate::timestamp::{normalize, Timestamp};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// An event read back from a text log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Captured {
    pub port_id: PortId,
    pub seconds: u32,
}

/// One annotated visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundTruth {
    pub port_id: PortId,
    pub start: u32,
    pub end: u32,
}

/// Parse the event lines of a text log. Lines whose timestamp cannot be
/// recovered are skipped.
pub fn read_log(text: &str) -> Vec<Captured> {
    text.lines()
        .filter(|line| {
            [" detected at ", " enter at ", " exit at "]
                .iter()
                .any(|marker| line.contains(marker))
        })
        .filter_map(|line| {
            let captured = parse_event_line(line);
            if captured.is_none() {
                debug!("Skipping log line: {}", line);
            }
            captured
        })
        .collect()
}

fn parse_event_line(line: &str) -> Option<Captured> {
    let (_, rest) = line.split_once("Bee ID=")?;
    let id: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let port_id = id.parse().ok()?;
    let token = line.split_whitespace().last()?;
    let seconds = normalize(token).seconds_from_midnight()?;
    Some(Captured { port_id, seconds })
}

/// Parse the annotation CSV. Columns are located by header name, so extra
/// columns and any order are accepted. Fields may be double-quoted, but a
/// quoted field cannot span lines.
pub fn read_ground_truth(text: &str) -> Result<Vec<GroundTruth>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        bail!("Ground truth is empty");
    };
    let columns = split_record(header);
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| *c == name)
            .with_context(|| format!("Ground truth has no `{}` column", name))
    };
    let id_col = column("Bee ID")?;
    let start_col = column("Start Timestamp")?;
    let end_col = column("End Timestamp")?;

    lines
        .enumerate()
        .map(|(row, line)| {
            let fields = split_record(line);
            let field = |col: usize| {
                fields
                    .get(col)
                    .map(String::as_str)
                    .with_context(|| format!("Ground truth row {} is short", row + 1))
            };
            let port_id = field(id_col)?
                .parse::<PortId>()
                .with_context(|| format!("Ground truth row {}: bad Bee ID", row + 1))?;
            let start = clock_seconds(field(start_col)?)
                .with_context(|| format!("Ground truth row {}: bad start", row + 1))?;
            let end = clock_seconds(field(end_col)?)
                .with_context(|| format!("Ground truth row {}: bad end", row + 1))?;
            Ok(GroundTruth {
                port_id,
                start,
                end,
            })
        })
        .collect()
}

/// Split one CSV line on commas outside double quotes. `""` inside quotes
/// is a literal quote. Fields are trimmed.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

fn clock_seconds(field: &str) -> Result<u32> {
    let timestamp: Timestamp = field.parse()?;
    timestamp
        .seconds_from_midnight()
        .with_context(|| format!("Invalid timestamp {}", field))
}

/// Bucket a capture/annotation pair is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScoreKey {
    Port(PortId),
    /// Used when ids are not checked.
    Pair { truth: PortId, captured: PortId },
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreKey::Port(id) => write!(f, "{}", id),
            ScoreKey::Pair { truth, captured } => write!(f, "GT: {}, CAP: {}", truth, captured),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub true_positives: u64,
    pub false_positives: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Score {
    pub captured: usize,
    pub truth: usize,
    pub per_key: BTreeMap<ScoreKey, Counts>,
}

impl Score {
    pub fn true_positives(&self) -> u64 {
        self.per_key.values().map(|c| c.true_positives).sum()
    }

    pub fn false_positives(&self) -> u64 {
        self.per_key.values().map(|c| c.false_positives).sum()
    }

    /// `TP / (TP + FP)`, zero when nothing was compared.
    pub fn accuracy(&self) -> f64 {
        let tp = self.true_positives();
        let total = tp + self.false_positives();
        if total == 0 {
            return 0.0;
        }
        tp as f64 / total as f64
    }

    /// Keys with the highest counts first, at most `n`.
    pub fn top<G>(&self, n: usize, get: G) -> Vec<(ScoreKey, u64)>
    where
        G: Fn(&Counts) -> u64,
    {
        let mut ranked: Vec<(ScoreKey, u64)> =
            self.per_key.iter().map(|(k, c)| (*k, get(c))).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- REPORT ---")?;
        writeln!(f, "Captured Events: {}", self.captured)?;
        writeln!(f, "Ground Truth Events: {}", self.truth)?;
        writeln!(f, "Total Captured True Positives: {}", self.true_positives())?;
        writeln!(f, "Total Captured False Positives: {}", self.false_positives())?;
        writeln!(f)?;
        writeln!(f, "Top 5 Captured True Positives by Bee ID:")?;
        for (key, count) in self.top(5, |c| c.true_positives) {
            writeln!(f, "  {:<16} {}", key, count)?;
        }
        writeln!(f, "Top 5 Captured False Positives by Bee ID:")?;
        for (key, count) in self.top(5, |c| c.false_positives) {
            writeln!(f, "  {:<16} {}", key, count)?;
        }
        write!(f, "---\nAccuracy: {:.4}", self.accuracy())
    }
}

/// Score every capture against every annotation. A capture inside
/// `[start - buffer, end + buffer]` of an annotation is a true positive for
/// that pair (when `check_id`, only if the ids also match); every other pair
/// is a false positive.
pub fn score(
    captured: &[Captured],
    truth: &[GroundTruth],
    buffer_secs: u32,
    check_id: bool,
) -> Score {
    let mut per_key: BTreeMap<ScoreKey, Counts> = BTreeMap::new();

    for cap in captured {
        for gt in truth {
            per_key.entry(ScoreKey::Port(gt.port_id)).or_default();

            let key = if check_id {
                ScoreKey::Port(cap.port_id)
            } else {
                ScoreKey::Pair {
                    truth: gt.port_id,
                    captured: cap.port_id,
                }
            };
            let in_window = cap.seconds + buffer_secs >= gt.start
                && cap.seconds <= gt.end.saturating_add(buffer_secs);
            let hit = in_window && (!check_id || cap.port_id == gt.port_id);

            let counts = per_key.entry(key).or_default();
            if hit {
                counts.true_positives += 1;
            } else {
                counts.false_positives += 1;
            }
        }
    }

    Score {
        captured: captured.len(),
        truth: truth.len(),
        per_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(port_id: PortId, seconds: u32) -> Captured {
        Captured { port_id, seconds }
    }

    fn visit(port_id: PortId, start: u32, end: u32) -> GroundTruth {
        GroundTruth {
            port_id,
            start,
            end,
        }
    }

    const LOG: &str = "\
--- Logging session started at 2024-05-01 09:00:00.000000 for file hive.mp4 ---
Bee ID=0 Tube Hive Coords: (50, 50)
Bee ID=0 detected at frame 100/900, Timestamp: 09:00:10
Bee ID=1 detected at frame 150/900, Timestamp: INVALID_TIMESTAMP
(Tracker 3 start) Bee ID=1 enter at frame 200/900, Timestamp: 09:01:00
(Tracker 3 end) Bee ID=1 exit at frame 260/900, Timestamp: 09:01:30
";

    const TRUTH: &str = "\
Bee ID,Start Timestamp,End Timestamp
0,09:00:05,09:00:08
1,09:01:00,09:01:20
";

    #[test]
    fn reads_event_lines_and_skips_invalid_timestamps() {
        let captured = read_log(LOG);
        assert_eq!(
            captured,
            vec![
                cap(0, 9 * 3600 + 10),
                cap(1, 9 * 3600 + 60),
                cap(1, 9 * 3600 + 90),
            ]
        );
    }

    #[test]
    fn reads_ground_truth_by_header() {
        let csv = "End Timestamp,Bee ID,Start Timestamp\n00:00:20,3,00:00:10\n";
        let truth = read_ground_truth(csv).unwrap();
        assert_eq!(truth, vec![visit(3, 10, 20)]);
        assert!(read_ground_truth("Bee ID,Start\n1,00:00:01\n").is_err());
        assert!(read_ground_truth("").is_err());
    }

    #[test]
    fn reads_quoted_ground_truth_fields() {
        let csv = "\
\"Bee ID\",\"Start Timestamp\",\"End Timestamp\",Notes
\"4\",\"00:00:01\",00:00:09,\"entered, then left \"\"fast\"\"\"
";
        let truth = read_ground_truth(csv).unwrap();
        assert_eq!(truth, vec![visit(4, 1, 9)]);
    }

    #[test]
    fn splits_records_outside_quotes() {
        assert_eq!(
            split_record(r#" a ,"b, c","say ""hi""",,"#),
            vec!["a", "b, c", r#"say "hi""#, "", ""]
        );
        // A quoted comma is not a column separator, so the id does not parse.
        let csv = "Bee ID,Start Timestamp,End Timestamp\n\"1, 2\",00:00:01,00:00:02\n";
        assert!(read_ground_truth(csv).is_err());
    }

    #[test]
    fn scores_with_id_check() {
        let captured = read_log(LOG);
        let truth = read_ground_truth(TRUTH).unwrap();
        let score = score(&captured, &truth, 10, true);

        // 3 captures x 2 annotations.
        assert_eq!(score.true_positives() + score.false_positives(), 6);
        // Port 0 at :10 is within 10s of its annotation; ports 1 at 1:00 and
        // 1:30 are within the window of theirs.
        assert_eq!(score.true_positives(), 3);
        assert_eq!(score.per_key[&ScoreKey::Port(0)].true_positives, 1);
        assert_eq!(score.per_key[&ScoreKey::Port(1)].true_positives, 2);
        assert!((score.accuracy() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn scores_without_id_check_by_pair() {
        let score = score(&[cap(2, 100)], &[visit(0, 95, 105)], 0, false);
        assert_eq!(score.true_positives(), 1);
        let pair = ScoreKey::Pair {
            truth: 0,
            captured: 2,
        };
        assert_eq!(score.per_key[&pair].true_positives, 1);
        // Every annotated id gets a bucket even when nothing lands in it.
        assert_eq!(score.per_key[&ScoreKey::Port(0)], Counts::default());
    }

    #[test]
    fn buffer_does_not_underflow_near_midnight() {
        let captured = vec![cap(0, 3)];
        let truth = vec![visit(0, 5, 8)];
        assert_eq!(score(&captured, &truth, 10, true).true_positives(), 1);
        assert_eq!(score(&captured, &truth, 1, true).true_positives(), 0);
    }

    #[test]
    fn empty_score_has_zero_accuracy() {
        assert_eq!(score(&[], &[], 10, true).accuracy(), 0.0);
    }

    #[test]
    fn report_lists_totals() {
        let report = score(&[cap(0, 10)], &[visit(0, 10, 10)], 0, true).to_string();
        assert!(report.contains("Total Captured True Positives: 1"));
        assert!(report.ends_with("Accuracy: 1.0000"));
    }
}
