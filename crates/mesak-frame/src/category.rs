//! The five telemetry categories and their wire constants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::layout::{self, Layout};

/// One kind of radar telemetry. Each category has its own data port,
/// packet layout and buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Status,
    Rvmap,
    Detection,
    Track,
    Measurement,
}

impl Category {
    /// Number of categories.
    pub const COUNT: usize = 5;

    /// All categories in index order.
    pub const ALL: [Category; Category::COUNT] = [
        Category::Status,
        Category::Rvmap,
        Category::Detection,
        Category::Track,
        Category::Measurement,
    ];

    /// Stable index in `0..COUNT`, used for per-category arrays.
    pub const fn index(self) -> usize {
        match self {
            Category::Status => 0,
            Category::Rvmap => 1,
            Category::Detection => 2,
            Category::Track => 3,
            Category::Measurement => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Category::Status => "status",
            Category::Rvmap => "rvmap",
            Category::Detection => "detection",
            Category::Track => "track",
            Category::Measurement => "measurement",
        }
    }

    /// Short file prefix used by archives.
    pub const fn prefix(self) -> &'static str {
        match self {
            Category::Status => "status",
            Category::Rvmap => "rvmap",
            Category::Detection => "detec",
            Category::Track => "track",
            Category::Measurement => "meas",
        }
    }

    /// ASCII marker at the start of the tag field.
    pub const fn marker(self) -> &'static [u8] {
        match self {
            Category::Status => layout::Status::MARKER,
            Category::Rvmap => layout::Rvmap::MARKER,
            Category::Detection => layout::Detection::MARKER,
            Category::Track => layout::Track::MARKER,
            Category::Measurement => layout::Measurement::MARKER,
        }
    }

    pub const fn tag_width(self) -> usize {
        match self {
            Category::Status => layout::Status::TAG_WIDTH,
            Category::Rvmap => layout::Rvmap::TAG_WIDTH,
            Category::Detection => layout::Detection::TAG_WIDTH,
            Category::Track => layout::Track::TAG_WIDTH,
            Category::Measurement => layout::Measurement::TAG_WIDTH,
        }
    }

    pub const fn header_size(self) -> usize {
        match self {
            Category::Status => layout::Status::HEADER_SIZE,
            Category::Rvmap => layout::Rvmap::HEADER_SIZE,
            Category::Detection => layout::Detection::HEADER_SIZE,
            Category::Track => layout::Track::HEADER_SIZE,
            Category::Measurement => layout::Measurement::HEADER_SIZE,
        }
    }

    pub const fn record_size(self) -> usize {
        match self {
            Category::Status => layout::Status::RECORD_SIZE,
            Category::Rvmap => layout::Rvmap::RECORD_SIZE,
            Category::Detection => layout::Detection::RECORD_SIZE,
            Category::Track => layout::Track::RECORD_SIZE,
            Category::Measurement => layout::Measurement::RECORD_SIZE,
        }
    }

    pub const fn max_records(self) -> usize {
        match self {
            Category::Status => layout::Status::MAX_RECORDS,
            Category::Rvmap => layout::Rvmap::MAX_RECORDS,
            Category::Detection => layout::Detection::MAX_RECORDS,
            Category::Track => layout::Track::MAX_RECORDS,
            Category::Measurement => layout::Measurement::MAX_RECORDS,
        }
    }

    /// Bytes needed to read the tag and `packet_size`.
    pub const fn start_size(self) -> usize {
        self.tag_width() + 4
    }

    /// Largest packet this category can legally declare.
    pub const fn max_packet_size(self) -> usize {
        self.header_size() + self.max_records() * self.record_size()
    }

    /// Smallest packet this category can legally declare.
    pub const fn min_packet_size(self) -> usize {
        match self {
            Category::Status => self.header_size() + self.record_size(),
            _ => self.header_size(),
        }
    }

    /// True when the tag field carries this category's marker.
    pub fn tag_matches(self, tag_field: &[u8]) -> bool {
        tag_field.starts_with(self.marker())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(Category::Status),
            "rvmap" => Ok(Category::Rvmap),
            "detection" | "detec" => Ok(Category::Detection),
            "track" => Ok(Category::Track),
            "measurement" | "meas" => Ok(Category::Measurement),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (i, category) in Category::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn variable_arity_bounds() {
        assert_eq!(Category::Detection.max_records(), 128);
        assert_eq!(Category::Track.max_records(), 128);
        assert_eq!(Category::Measurement.max_records(), 256);
        assert_eq!(Category::Status.max_records(), 1);
    }

    #[test]
    fn tag_widths_follow_device_headers() {
        assert_eq!(Category::Status.tag_width(), 12);
        assert_eq!(Category::Detection.tag_width(), 12);
        assert_eq!(Category::Track.tag_width(), 12);
        assert_eq!(Category::Rvmap.tag_width(), 16);
        assert_eq!(Category::Measurement.tag_width(), 16);
    }

    #[test]
    fn parse_accepts_names_and_prefixes() {
        assert_eq!("Track".parse::<Category>().unwrap(), Category::Track);
        assert_eq!("meas".parse::<Category>().unwrap(), Category::Measurement);
        assert_eq!("detec".parse::<Category>().unwrap(), Category::Detection);
        assert!("sonar".parse::<Category>().is_err());
    }

    #[test]
    fn tag_match_uses_marker_prefix() {
        let mut field = [0u8; 12];
        field[..7].copy_from_slice(b"<track>");
        assert!(Category::Track.tag_matches(&field));
        assert!(!Category::Status.tag_matches(&field));
    }
}
