use std::cmp::Ordering;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::core::parse::format_file_size;

/// Codec sentinel the extractor uses for a missing track.
const NONE_CODEC: &str = "none";

/// Composite format identifier: one or more atomic track tokens joined by
/// `+`, e.g. `"137+251"` for video track 137 merged with audio track 251.
///
/// Token order is meaningful and preserved: the first token must be the
/// video track. If the video is 299 and the audio is 251, the identifier is
/// `"299+251"`, not `"251+299"`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct FormatId {
    ids: Vec<String>,
}

impl FormatId {
    pub fn new(format_id: &str) -> Self {
        Self {
            ids: format_id
                .split('+')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Decomposes into single-token identifiers, in order.
    pub fn compound_ids(&self) -> Vec<FormatId> {
        self.ids
            .iter()
            .map(|id| FormatId {
                ids: vec![id.clone()],
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ids.join("+"))
    }
}

impl From<&str> for FormatId {
    fn from(format_id: &str) -> Self {
        Self::new(format_id)
    }
}

impl From<String> for FormatId {
    fn from(format_id: String) -> Self {
        Self::new(&format_id)
    }
}

impl Ord for FormatId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for FormatId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for FormatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FormatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FormatId::new(&s))
    }
}

/// A single atomic track as reported by the extractor's JSON dump.
///
/// Missing JSON keys default to empty strings and zeros; a zero `filesize`
/// means unknown. Codec fields carry the extractor's `"none"` sentinel when
/// the track has no audio or no video.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StreamFormat {
    pub format_id: FormatId,
    pub ext: String,
    pub format_note: String,
    pub filesize: i64,
    pub acodec: String,
    pub abr: i32,
    pub asr: i32,
    pub vcodec: String,
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    pub tbr: i32,
}

impl StreamFormat {
    pub fn has_video(&self) -> bool {
        self.vcodec != NONE_CODEC
    }

    pub fn has_audio(&self) -> bool {
        self.acodec != NONE_CODEC
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_video() && self.has_audio() {
            let width = if self.width <= 0 {
                "?".to_string()
            } else {
                self.width.to_string()
            };
            let height = if self.height <= 0 {
                "?".to_string()
            } else {
                self.height.to_string()
            };
            let note = if self.format_note.is_empty() {
                String::new()
            } else {
                format!(" ({})", self.format_note)
            };
            let size = if self.filesize <= 0 {
                String::new()
            } else {
                format!(", size: {}", format_file_size(self.filesize))
            };
            return write!(f, "Video {} x {}{}{}", width, height, note, size);
        }
        if self.has_video() {
            return write!(
                f,
                "[{}] {} x {} ({} fps) @ {} KBit/s, codec: {}",
                self.ext.to_uppercase(),
                self.width,
                self.height,
                self.fps,
                self.tbr,
                self.vcodec
            );
        }
        if self.has_audio() {
            return write!(
                f,
                "[{}] {} Hz @ {} KBit/s, codec: {}",
                self.ext.to_uppercase(),
                self.asr,
                self.abr,
                self.acodec
            );
        }
        Ok(())
    }
}
