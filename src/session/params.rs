//! # Session Parameter Resolution
//!
//! Turns the loosely-validated multipart form fields into a canonical
//! `SessionSpec`. This layer is deliberately permissive: it never rejects a
//! request because of a bad numeric field.
//!
//! ## Resolution Rules:
//! - **Absent or unparseable input**: falls back to the documented default
//! - **Finite but out-of-range input**: clamped to the documented range
//! - **Filename hint**: stripped to `[A-Za-z0-9_-]`, truncated to 40 chars,
//!   dropped entirely if nothing survives
//!
//! Duration is the one field this module does not finalize. It only reports
//! whether the caller supplied a usable number (`requested_duration`); the
//! duration resolver owns the probe-or-fallback decision. A non-numeric
//! duration is treated as "not provided" and triggers auto-probing, while an
//! out-of-range numeric one is clamped. Both behaviors are intentional and
//! load-bearing for API compatibility.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Carrier tone frequency range in Hz.
pub const CARRIER_HZ_RANGE: (f64, f64) = (100.0, 1000.0);
/// Beat frequency range in Hz (applies to both ramp endpoints).
pub const BEAT_HZ_RANGE: (f64, f64) = (0.0, 40.0);
/// Render duration range in seconds (one minute to two hours).
pub const DURATION_SEC_RANGE: (f64, f64) = (60.0, 7200.0);
/// Linear gain range for both the tone pair and the music bed.
pub const GAIN_RANGE: (f64, f64) = (0.0, 1.0);
/// Fade-in/fade-out length range in seconds.
pub const FADE_SEC_RANGE: (f64, f64) = (0.0, 10.0);

pub const DEFAULT_CARRIER_HZ: f64 = 420.0;
pub const DEFAULT_BEAT_START_HZ: f64 = 12.0;
pub const DEFAULT_BEAT_END_HZ: f64 = 14.0;
/// Used when the caller supplies no duration and no music file (or the
/// duration probe fails).
pub const DEFAULT_DURATION_SEC: f64 = 1800.0;
pub const DEFAULT_TONE_GAIN: f64 = 0.25;
pub const DEFAULT_MUSIC_GAIN: f64 = 0.35;
pub const DEFAULT_FADE_SEC: f64 = 3.0;

/// Maximum length of the sanitized filename hint.
const HINT_MAX_CHARS: usize = 40;

/// Raw per-request input collected from the multipart form.
///
/// Text fields land in a name → value map exactly as received; the optional
/// music upload is referenced by the temp path the handler saved it to. The
/// file itself is owned by the upload store — this type only carries the
/// path.
#[derive(Debug, Default)]
pub struct RawSessionRequest {
    fields: HashMap<String, String>,
    music: Option<PathBuf>,
}

impl RawSessionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a text form field. Later duplicates overwrite earlier ones.
    pub fn set_field(&mut self, name: &str, value: String) {
        self.fields.insert(name.to_string(), value);
    }

    /// Attach the saved music upload path.
    pub fn set_music(&mut self, path: PathBuf) {
        self.music = Some(path);
    }

    pub fn music(&self) -> Option<&Path> {
        self.music.as_deref()
    }

    /// Parse a field as a finite number. Absent, empty, non-numeric, NaN and
    /// infinite inputs all collapse to `None`.
    fn numeric(&self, name: &str) -> Option<f64> {
        self.fields
            .get(name)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// The caller-supplied duration, if it parsed as a finite number.
    ///
    /// `None` here means "let the duration resolver decide" — either by
    /// probing the music file or by falling back to the default.
    pub fn requested_duration(&self) -> Option<f64> {
        self.numeric("durationSec")
    }

    /// Build the canonical spec. `duration_sec` must already be resolved and
    /// in range; downstream components trust it without re-validating.
    pub fn resolve(&self, duration_sec: f64) -> SessionSpec {
        SessionSpec {
            carrier_hz: clamp_or_default(self.numeric("carrier"), CARRIER_HZ_RANGE, DEFAULT_CARRIER_HZ),
            beat_start_hz: clamp_or_default(self.numeric("beatStart"), BEAT_HZ_RANGE, DEFAULT_BEAT_START_HZ),
            beat_end_hz: clamp_or_default(self.numeric("beatEnd"), BEAT_HZ_RANGE, DEFAULT_BEAT_END_HZ),
            duration_sec,
            tone_gain: clamp_or_default(self.numeric("toneGain"), GAIN_RANGE, DEFAULT_TONE_GAIN),
            music_gain: clamp_or_default(self.numeric("musicGain"), GAIN_RANGE, DEFAULT_MUSIC_GAIN),
            fade_sec: clamp_or_default(self.numeric("fadeSec"), FADE_SEC_RANGE, DEFAULT_FADE_SEC),
            filename_hint: self.fields.get("filenameHint").and_then(|h| sanitize_hint(h)),
            music: self.music.clone(),
        }
    }
}

/// Fully-resolved session parameters. Immutable once built; every numeric
/// field is inside its documented range.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSpec {
    pub carrier_hz: f64,
    pub beat_start_hz: f64,
    pub beat_end_hz: f64,
    pub duration_sec: f64,
    pub tone_gain: f64,
    pub music_gain: f64,
    pub fade_sec: f64,
    pub filename_hint: Option<String>,
    /// Temp path of the uploaded music bed, when one was provided.
    pub music: Option<PathBuf>,
}

impl SessionSpec {
    pub fn has_music(&self) -> bool {
        self.music.is_some()
    }
}

/// Clamp a finite value into `range`, or fall back to `default` when the
/// input is absent or not a finite number.
fn clamp_or_default(value: Option<f64>, range: (f64, f64), default: f64) -> f64 {
    match value {
        Some(v) => v.clamp(range.0, range.1),
        None => default,
    }
}

/// Strip a filename hint down to `[A-Za-z0-9_-]` and cap its length.
/// Returns `None` when nothing usable survives.
pub fn sanitize_hint(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(HINT_MAX_CHARS)
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
