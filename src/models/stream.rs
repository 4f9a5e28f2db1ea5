use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::filename::clean_file_name;
use crate::models::format::{FormatId, StreamFormat};

/// Per-item status a playlist member can carry without failing the whole
/// collection run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum StreamError {
    #[default]
    None,
    /// The dump line for this item was not valid JSON.
    JsonFormat,
    /// The extractor reported the item on stderr (removed, private, geo-blocked).
    Unavailable,
}

/// A flat-playlist entry: the authoritative ordering for a playlist, with
/// identifiers and titles but no per-item format listing.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PlaylistEntry {
    #[serde(rename = "_type")]
    pub entry_type: String,
    pub id: String,
    pub ie_key: String,
    pub title: String,
    pub url: String,
}

/// A single media resource's metadata, as reconciled from the extractor's
/// detailed dump and flat-playlist probes.
///
/// Produced atomically by the collector and treated as a value snapshot
/// thereafter; only the three user-override fields mutate on the consumer
/// side.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub filename: String,
    pub webpage_url: String,
    pub fulltitle: String,
    pub default_title: String,
    pub default_suffix: String,
    pub description: String,
    pub thumbnail: String,
    pub extractor: String,
    pub extractor_key: String,
    pub default_format_id: FormatId,
    pub formats: Vec<StreamFormat>,
    pub playlist: String,
    pub playlist_index: String,
    error: StreamError,
    user_title: String,
    user_suffix: String,
    user_format_id: FormatId,
}

impl StreamInfo {
    pub fn error(&self) -> StreamError {
        self.error
    }

    pub fn set_error(&mut self, error: StreamError) {
        self.error = error;
    }

    pub fn is_available(&self) -> bool {
        self.error == StreamError::None
    }

    pub fn title(&self) -> &str {
        if self.user_title.is_empty() {
            &self.default_title
        } else {
            &self.user_title
        }
    }

    /// Setting the default title clears the override.
    pub fn set_title(&mut self, title: &str) {
        self.user_title = if title == self.default_title {
            String::new()
        } else {
            title.to_string()
        };
    }

    pub fn format_id(&self) -> FormatId {
        if self.user_format_id.is_empty() {
            self.default_format_id.clone()
        } else {
            self.user_format_id.clone()
        }
    }

    /// Changing the composite invalidates any user-chosen suffix, which must
    /// be re-derived from the new selection.
    pub fn set_format_id(&mut self, format_id: FormatId) {
        self.user_suffix = String::new();
        self.user_format_id = if format_id == self.default_format_id {
            FormatId::default()
        } else {
            format_id
        };
    }

    pub fn suffix(&self) -> String {
        if self.user_suffix.is_empty() {
            self.suffix_for(&self.format_id())
        } else {
            self.user_suffix.clone()
        }
    }

    /// Container extension for a composite: the extension of the first atom
    /// that carries video, otherwise the extension of the last known atom.
    pub fn suffix_for(&self, format_id: &FormatId) -> String {
        if self.default_format_id.is_empty() {
            return "???".to_string();
        }
        if self.default_format_id == *format_id {
            return self.default_suffix.clone();
        }
        let mut suffix = self.default_suffix.clone();
        for id in format_id.compound_ids() {
            for format in &self.formats {
                if id == format.format_id {
                    if format.has_video() {
                        return format.ext.clone();
                    }
                    suffix = format.ext.clone();
                }
            }
        }
        suffix
    }

    pub fn set_suffix(&mut self, suffix: &str) {
        self.user_suffix = if suffix == self.default_suffix {
            String::new()
        } else {
            suffix.to_string()
        };
    }

    pub fn file_base_name(&self) -> String {
        clean_file_name(self.title())
    }

    pub fn full_file_name(&self) -> String {
        let suffix = self.suffix();
        if suffix.is_empty() {
            self.file_base_name()
        } else {
            format!("{}.{}", self.file_base_name(), suffix)
        }
    }

    pub fn guestimate_full_size(&self) -> i64 {
        self.guestimate_full_size_for(&self.format_id())
    }

    /// Sum of the known sizes of the composite's atoms; unknown atoms count
    /// as zero, an empty identifier yields -1.
    pub fn guestimate_full_size_for(&self, format_id: &FormatId) -> i64 {
        if format_id.is_empty() {
            return -1;
        }
        let mut sizes: HashMap<FormatId, i64> = HashMap::new();
        for format in &self.formats {
            sizes.insert(format.format_id.clone(), format.filesize);
        }
        format_id
            .compound_ids()
            .iter()
            .map(|id| sizes.get(id).copied().unwrap_or(0))
            .sum()
    }

    /// Human description of the currently selected composite, one atom after
    /// another.
    pub fn format_to_string(&self) -> String {
        let mut ret = String::new();
        for id in self.format_id().compound_ids() {
            for format in &self.formats {
                if id == format.format_id {
                    if !ret.is_empty() {
                        ret.push(' ');
                    }
                    ret.push_str(&format.to_string());
                }
            }
        }
        ret
    }

    /// The one-click set: formats carrying both video and audio,
    /// deduplicated, in ascending order of resolution then description.
    pub fn default_formats(&self) -> Vec<StreamFormat> {
        let mut map: BTreeMap<String, StreamFormat> = BTreeMap::new();
        for format in &self.formats {
            if format.has_video() && format.has_audio() {
                let key = format!("{:016} {:016} {}", format.width, format.height, format);
                map.insert(key, format.clone());
            }
        }
        map.into_values().collect()
    }

    /// Audio-only formats, in extractor order.
    pub fn audio_formats(&self) -> Vec<StreamFormat> {
        self.formats
            .iter()
            .filter(|f| !f.has_video() && f.has_audio())
            .cloned()
            .collect()
    }

    /// Video-only formats, in extractor order.
    pub fn video_formats(&self) -> Vec<StreamFormat> {
        self.formats
            .iter()
            .filter(|f| f.has_video() && !f.has_audio())
            .cloned()
            .collect()
    }
}
