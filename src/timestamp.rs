use crate::geometry::BoundingBox;
use anyhow::Result;
use chrono::{NaiveTime, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

pub const INVALID_TIMESTAMP: &str = "INVALID_TIMESTAMP";

const TIME_FORMAT: &str = "%H:%M:%S";

/// Wall-clock time burned into the video by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Valid(NaiveTime),
    Invalid,
}

impl Timestamp {
    pub fn is_valid(&self) -> bool {
        matches!(self, Timestamp::Valid(_))
    }

    pub fn seconds_from_midnight(&self) -> Option<u32> {
        match self {
            Timestamp::Valid(time) => Some(time.num_seconds_from_midnight()),
            Timestamp::Invalid => None,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Valid(time) => write!(f, "{}", time.format(TIME_FORMAT)),
            Timestamp::Invalid => f.write_str(INVALID_TIMESTAMP),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Strict `HH:MM:SS` or the invalid sentinel. Unlike [`normalize`], no repair
/// is attempted.
impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == INVALID_TIMESTAMP {
            return Ok(Timestamp::Invalid);
        }
        NaiveTime::parse_from_str(s, TIME_FORMAT).map(Timestamp::Valid)
    }
}

/// Clean raw OCR output from the timestamp overlay into a time of day.
///
/// Everything up to the last underscore is discarded (camera name prefix),
/// then only digits and colons are kept. A missing or partial colon layout is
/// repaired before the result is parsed as `HH:MM:SS`. Anything that cannot
/// be repaired comes back as [`Timestamp::Invalid`].
pub fn normalize(raw: &str) -> Timestamp {
    let tail = raw.rsplit('_').next().unwrap_or_default().trim();
    let cleaned: String = tail
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ':')
        .collect();

    let repaired = repair_colons(&cleaned);
    if repaired.len() < 5 {
        debug!("Dropping insufficient timestamp {:?}", raw);
        return Timestamp::Invalid;
    }

    let candidate = head(&repaired, 8);
    match parse_strict(candidate) {
        Some(time) => Timestamp::Valid(time),
        None => {
            debug!("Unable to parse timestamp {:?} (from {:?})", candidate, raw);
            Timestamp::Invalid
        }
    }
}

fn repair_colons(s: &str) -> String {
    match s.matches(':').count() {
        0 => format!("{}:{}:{}", head(s, 2), slice(s, 2, 4), tail_from(s, 4)),
        1 => {
            let (hours, rest) = s.split_once(':').unwrap_or((s, ""));
            let rest = match rest.len() {
                3 => format!("{}:{}0", head(rest, 2), tail_from(rest, 2)),
                2 => format!("{}:00", rest),
                1 => format!("0{}:00", rest),
                _ => format!("{}:{}", head(rest, 2), tail_from(rest, 2)),
            };
            format!("{}:{}", hours, rest)
        }
        _ => s.to_string(),
    }
}

fn parse_strict(s: &str) -> Option<NaiveTime> {
    let bytes = s.as_bytes();
    if bytes.len() != 8 || bytes[2] != b':' || bytes[5] != b':' {
        return None;
    }
    NaiveTime::parse_from_str(s, TIME_FORMAT).ok()
}

// The cleaned string is ASCII, so byte offsets are char offsets.
fn head(s: &str, n: usize) -> &str {
    &s[..n.min(s.len())]
}

fn tail_from(s: &str, n: usize) -> &str {
    &s[n.min(s.len())..]
}

fn slice(s: &str, from: usize, to: usize) -> &str {
    &s[from.min(s.len())..to.min(s.len())]
}

/// Text recognition over a sub-image of the frame.
pub trait TextRecognizer<F> {
    fn recognize(&mut self, frame: &F, region: BoundingBox) -> Result<String>;
}

/// Reads the on-screen clock. OCR is slow, so callers only invoke this on
/// frames that produce an event.
pub struct TimestampReader<F> {
    recognizer: Option<Box<dyn TextRecognizer<F>>>,
    region: Option<BoundingBox>,
    reads: u64,
}

impl<F> TimestampReader<F> {
    pub fn new(recognizer: Box<dyn TextRecognizer<F>>, region: BoundingBox) -> Self {
        Self {
            recognizer: Some(recognizer),
            region: Some(region),
            reads: 0,
        }
    }

    /// A reader for videos without a clock overlay; every read is invalid.
    pub fn disabled() -> Self {
        Self {
            recognizer: None,
            region: None,
            reads: 0,
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn read(&mut self, frame: &F) -> Timestamp {
        let (Some(recognizer), Some(region)) = (self.recognizer.as_mut(), self.region) else {
            return Timestamp::Invalid;
        };
        self.reads += 1;
        match recognizer.recognize(frame, region) {
            Ok(text) => normalize(&text),
            Err(err) => {
                warn!("Timestamp OCR failed: {:#}", err);
                Timestamp::Invalid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(s: &str) -> Timestamp {
        Timestamp::Valid(NaiveTime::parse_from_str(s, TIME_FORMAT).unwrap())
    }

    #[test]
    fn inserts_missing_colons() {
        assert_eq!(normalize("123456"), valid("12:34:56"));
        assert_eq!(normalize("123456").to_string(), "12:34:56");
    }

    #[test]
    fn pads_single_colon_suffix() {
        assert_eq!(normalize("12:3").to_string(), "12:03:00");
        assert_eq!(normalize("12:34").to_string(), "12:34:00");
        assert_eq!(normalize("12:345").to_string(), "12:34:50");
        assert_eq!(normalize("12:3456").to_string(), "12:34:56");
    }

    #[test]
    fn short_input_is_invalid() {
        assert_eq!(normalize("ab"), Timestamp::Invalid);
        assert_eq!(normalize("12"), Timestamp::Invalid);
        assert_eq!(normalize("").to_string(), INVALID_TIMESTAMP);
    }

    #[test]
    fn strips_camera_prefix_and_noise() {
        assert_eq!(normalize("CAM_2_08:15:59\n").to_string(), "08:15:59");
        assert_eq!(normalize(" 08.15.59 ").to_string(), "08:15:59");
        assert_eq!(normalize("T 07:0 1:02").to_string(), "07:01:02");
    }

    #[test]
    fn truncates_to_eight_characters() {
        assert_eq!(normalize("1234567").to_string(), "12:34:56");
        assert_eq!(normalize("12:34:56789").to_string(), "12:34:56");
    }

    #[test]
    fn out_of_range_fields_are_invalid() {
        assert_eq!(normalize("25:00:00"), Timestamp::Invalid);
        assert_eq!(normalize("12:61:00"), Timestamp::Invalid);
        assert_eq!(normalize("1:2:3:4"), Timestamp::Invalid);
    }

    #[test]
    fn strict_parse_round_trips_display() {
        let ts: Timestamp = "09:05:01".parse().unwrap();
        assert_eq!(ts.to_string(), "09:05:01");
        assert_eq!(ts.seconds_from_midnight(), Some(9 * 3600 + 5 * 60 + 1));
        let invalid: Timestamp = INVALID_TIMESTAMP.parse().unwrap();
        assert!(!invalid.is_valid());
        assert!("9:5".parse::<Timestamp>().is_err());
    }

    struct Fails;

    impl TextRecognizer<()> for Fails {
        fn recognize(&mut self, _frame: &(), _region: BoundingBox) -> Result<String> {
            anyhow::bail!("tesseract not installed")
        }
    }

    #[test]
    fn recognizer_errors_degrade_to_invalid() {
        let mut reader = TimestampReader::new(Box::new(Fails), BoundingBox::new(0, 0, 10, 10));
        assert_eq!(reader.read(&()), Timestamp::Invalid);
        assert_eq!(reader.reads(), 1);

        let mut disabled = TimestampReader::<()>::disabled();
        assert_eq!(disabled.read(&()), Timestamp::Invalid);
        assert_eq!(disabled.reads(), 0);
    }
}
