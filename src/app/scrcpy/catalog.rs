use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::app::adb::runner::run_command_with_timeout;
use crate::app::config::{read_json, write_json};
use crate::app::error::AppError;
use crate::app::models::is_sentinel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EncoderMode {
    Hw,
    Sw,
}

impl EncoderMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hw" => Some(EncoderMode::Hw),
            "sw" => Some(EncoderMode::Sw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderMode::Hw => "hw",
            EncoderMode::Sw => "sw",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct EncoderEntry {
    pub name: String,
    pub mode: EncoderMode,
}

impl fmt::Display for EncoderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mode.as_str())
    }
}

/// A `(mode, codec)` pair as offered to the user, rendered `HW - h264`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CodecChoice {
    pub codec: String,
    pub mode: EncoderMode,
}

impl fmt::Display for CodecChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.mode.as_str().to_uppercase(), self.codec)
    }
}

/// Codec to encoders, separately for video and audio.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncoderCatalog {
    pub video: BTreeMap<String, Vec<EncoderEntry>>,
    pub audio: BTreeMap<String, Vec<EncoderEntry>>,
}

impl EncoderCatalog {
    pub fn streams(&self, kind: MediaKind) -> &BTreeMap<String, Vec<EncoderEntry>> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    fn streams_mut(&mut self, kind: MediaKind) -> &mut BTreeMap<String, Vec<EncoderEntry>> {
        match kind {
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        }
    }

    pub fn insert(&mut self, kind: MediaKind, codec: &str, entry: EncoderEntry) {
        let entries = self.streams_mut(kind).entry(codec.to_string()).or_default();
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }

    /// Every distinct `(mode, codec)` pair, sorted by codec then mode.
    pub fn codec_choices(&self, kind: MediaKind) -> Vec<CodecChoice> {
        let mut choices = Vec::new();
        for (codec, entries) in self.streams(kind) {
            let mut modes: Vec<EncoderMode> = entries.iter().map(|entry| entry.mode).collect();
            modes.sort();
            modes.dedup();
            for mode in modes {
                choices.push(CodecChoice {
                    codec: codec.clone(),
                    mode,
                });
            }
        }
        choices
    }

    pub fn encoders_for(&self, kind: MediaKind, choice: &CodecChoice) -> Vec<EncoderEntry> {
        let mut entries: Vec<EncoderEntry> = self
            .streams(kind)
            .get(&choice.codec)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.mode == choice.mode)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        entries
    }
}

/// Typed codec/encoder pair for one media stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaSelection {
    pub codec: String,
    pub encoder: String,
    pub mode: Option<EncoderMode>,
}

impl MediaSelection {
    /// Accepts plain values (`h264`, `c2.qti.avc.encoder`) as well as the labels shown to
    /// users (`HW - h264`, `c2.qti.avc.encoder (hw)`). `None` when either side is unset.
    pub fn from_labels(codec_label: Option<&str>, encoder_label: Option<&str>) -> Option<Self> {
        let codec_label = codec_label?.trim();
        let encoder_label = encoder_label?.trim();
        if is_sentinel(codec_label) || is_sentinel(encoder_label) {
            return None;
        }

        let (label_mode, codec) = match codec_label.rsplit_once(" - ") {
            Some((mode, codec)) => (EncoderMode::parse(mode), codec.trim()),
            None => (None, codec_label),
        };
        let encoder = encoder_label.split_whitespace().next()?;
        let encoder_mode = encoder_label
            .rsplit_once('(')
            .and_then(|(_, rest)| rest.strip_suffix(')'))
            .and_then(EncoderMode::parse);

        if codec.is_empty() || is_sentinel(encoder) {
            return None;
        }
        Some(Self {
            codec: codec.to_string(),
            encoder: encoder.trim_matches('\'').to_string(),
            mode: encoder_mode.or(label_mode),
        })
    }
}

/// Parses `scrcpy --list-encoders` output.
pub fn parse_list_encoders(output: &str) -> EncoderCatalog {
    static ENCODER_LINE: OnceLock<Regex> = OnceLock::new();
    let re = ENCODER_LINE.get_or_init(|| {
        Regex::new(r"^--(video|audio)-codec=(\w+)\s+--(?:video|audio)-encoder='?([\w.-]+)'?\s+\((hw|sw)\)")
            .expect("encoder regex")
    });

    let mut catalog = EncoderCatalog::default();
    for line in output.lines() {
        let line = line.trim();
        if line.contains("(alias for") {
            continue;
        }
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let kind = if &caps[1] == "video" {
            MediaKind::Video
        } else {
            MediaKind::Audio
        };
        let Some(mode) = EncoderMode::parse(&caps[4]) else {
            continue;
        };
        catalog.insert(
            kind,
            &caps[2],
            EncoderEntry {
                name: caps[3].to_string(),
                mode,
            },
        );
    }
    catalog
}

/// Parses `scrcpy --list-apps` output into display name to package.
pub fn parse_list_apps(output: &str) -> BTreeMap<String, String> {
    static APP_LINE: OnceLock<Regex> = OnceLock::new();
    let re = APP_LINE
        .get_or_init(|| Regex::new(r"^(.+?)\s{2,}([a-zA-Z0-9_.]+)$").expect("app regex"));

    let mut apps = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) else {
            continue;
        };
        if let Some(caps) = re.captures(rest.trim()) {
            apps.insert(caps[1].trim().to_string(), caps[2].trim().to_string());
        }
    }
    apps
}

pub fn query_encoders(scrcpy_program: &str, serial: Option<&str>, trace_id: &str) -> Result<EncoderCatalog, AppError> {
    let output = run_listing(scrcpy_program, "--list-encoders", serial, trace_id)?;
    Ok(parse_list_encoders(&output))
}

pub fn query_installed_apps(
    scrcpy_program: &str,
    serial: Option<&str>,
    trace_id: &str,
) -> Result<BTreeMap<String, String>, AppError> {
    let output = run_listing(scrcpy_program, "--list-apps", serial, trace_id)?;
    Ok(parse_list_apps(&output))
}

pub fn load_cached<T>(path: &Path, trace_id: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return T::default();
    }
    read_json(path, trace_id).unwrap_or_default()
}

pub fn save_cached<T: Serialize>(path: &Path, value: &T, trace_id: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    write_json(path, value, trace_id)
}

fn run_listing(
    scrcpy_program: &str,
    flag: &str,
    serial: Option<&str>,
    trace_id: &str,
) -> Result<String, AppError> {
    let mut args = Vec::new();
    if let Some(serial) = serial.filter(|value| !value.trim().is_empty()) {
        args.push(format!("--serial={serial}"));
    }
    args.push(flag.to_string());
    let output = run_command_with_timeout(
        scrcpy_program,
        &args,
        std::time::Duration::from_secs(30),
        trace_id,
    )
    .map_err(|err| AppError::dependency(err.error, trace_id))?;
    if !output.success() {
        return Err(AppError::dependency(
            format!("scrcpy {flag} failed: {}", output.failure_detail()),
            trace_id,
        ));
    }
    // scrcpy prints the listing on stdout, device chatter on stderr
    Ok(format!("{}\n{}", output.stdout, output.stderr))
}
