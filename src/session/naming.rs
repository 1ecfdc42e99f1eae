//! # Session Naming and Labeling
//!
//! Maps the beat-frequency band to a human label, formats the beat
//! descriptor, and assembles the download filename plus the response metadata
//! headers. Headers must be applied before the first body byte goes out —
//! once streaming starts they cannot change.

use crate::session::graph::{OUTPUT_BIT_DEPTH, OUTPUT_SAMPLE_RATE};
use crate::session::params::SessionSpec;
use actix_web::HttpResponseBuilder;
use uuid::Uuid;

/// Classify the average beat frequency into a brainwave band.
///
/// Boundaries are half-open except Beta's upper bound, which is inclusive:
/// `< 4` Delta, `[4, 8)` Theta, `[8, 12)` Alpha, `[12, 20]` Beta, above that
/// Custom.
pub fn band_label(avg_beat_hz: f64) -> &'static str {
    if avg_beat_hz < 4.0 {
        "Delta"
    } else if avg_beat_hz < 8.0 {
        "Theta"
    } else if avg_beat_hz < 12.0 {
        "Alpha"
    } else if avg_beat_hz <= 20.0 {
        "Beta"
    } else {
        "Custom"
    }
}

/// Format the beat range with two decimals: a single value for a flat beat
/// (`"14.00Hz"`), `start-end` for a ramp (`"14.00-18.00Hz"`).
pub fn beat_descriptor(beat_start_hz: f64, beat_end_hz: f64) -> String {
    if beat_start_hz == beat_end_hz {
        format!("{beat_start_hz:.2}Hz")
    } else {
        format!("{beat_start_hz:.2}-{beat_end_hz:.2}Hz")
    }
}

/// Response metadata for one session: the band label, the attachment
/// filename, and the numeric fields surfaced as `X-*` headers.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub label: &'static str,
    pub descriptor: String,
    pub filename: String,
    pub carrier_hz: f64,
    pub beat_start_hz: f64,
    pub beat_end_hz: f64,
    pub duration_sec: f64,
}

impl ResponseMeta {
    /// Derive the metadata for a resolved spec. The filename embeds a fresh
    /// v4 UUID so concurrent renders can never collide.
    pub fn for_spec(spec: &SessionSpec) -> Self {
        let avg = (spec.beat_start_hz + spec.beat_end_hz) / 2.0;
        let label = band_label(avg);
        let descriptor = beat_descriptor(spec.beat_start_hz, spec.beat_end_hz);

        let stem = spec.filename_hint.as_deref().unwrap_or(label);
        let minutes = (spec.duration_sec / 60.0).round() as u64;
        let filename = format!(
            "{stem}_{desc}_{minutes}min_{id}.wav",
            desc = descriptor.replace('.', "p"),
            id = Uuid::new_v4(),
        );

        Self {
            label,
            descriptor,
            filename,
            carrier_hz: spec.carrier_hz,
            beat_start_hz: spec.beat_start_hz,
            beat_end_hz: spec.beat_end_hz,
            duration_sec: spec.duration_sec,
        }
    }

    /// Apply content headers and the session metadata fields to a response
    /// under construction.
    pub fn apply(&self, response: &mut HttpResponseBuilder) {
        response
            .insert_header(("Content-Type", "audio/wav"))
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", self.filename),
            ))
            .insert_header(("X-Beat-Start-Hz", self.beat_start_hz.to_string()))
            .insert_header(("X-Beat-End-Hz", self.beat_end_hz.to_string()))
            .insert_header(("X-Carrier-Hz", self.carrier_hz.to_string()))
            .insert_header(("X-Duration-Sec", self.duration_sec.to_string()))
            .insert_header(("X-Sample-Rate", OUTPUT_SAMPLE_RATE.to_string()))
            .insert_header(("X-Bit-Depth", OUTPUT_BIT_DEPTH.to_string()))
            .insert_header(("X-Session-Label", self.label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::params::RawSessionRequest;

    #[test]
    fn band_boundaries_are_exact() {
        assert_eq!(band_label(0.0), "Delta");
        assert_eq!(band_label(3.999), "Delta");
        assert_eq!(band_label(4.0), "Theta");
        assert_eq!(band_label(7.999), "Theta");
        assert_eq!(band_label(8.0), "Alpha");
        assert_eq!(band_label(11.999), "Alpha");
        assert_eq!(band_label(12.0), "Beta");
        assert_eq!(band_label(20.0), "Beta");
        assert_eq!(band_label(20.001), "Custom");
    }

    #[test]
    fn descriptor_formats_flat_and_ramped_beats() {
        assert_eq!(beat_descriptor(8.0, 8.0), "8.00Hz");
        assert_eq!(beat_descriptor(14.0, 18.0), "14.00-18.00Hz");
        assert_eq!(beat_descriptor(0.5, 0.5), "0.50Hz");
    }

    fn spec_with(fields: &[(&str, &str)], duration: f64) -> crate::session::params::SessionSpec {
        let mut raw = RawSessionRequest::new();
        for (name, value) in fields {
            raw.set_field(name, value.to_string());
        }
        raw.resolve(duration)
    }

    #[test]
    fn filename_uses_label_when_no_hint() {
        let spec = spec_with(&[("beatStart", "14"), ("beatEnd", "18")], 600.0);
        let meta = ResponseMeta::for_spec(&spec);

        assert_eq!(meta.label, "Beta");
        assert!(meta.filename.starts_with("Beta_14p00-18p00Hz_10min_"));
        assert!(meta.filename.ends_with(".wav"));
    }

    #[test]
    fn filename_prefers_sanitized_hint() {
        let spec = spec_with(
            &[("beatStart", "8"), ("beatEnd", "8"), ("filenameHint", "Deep Work")],
            1800.0,
        );
        let meta = ResponseMeta::for_spec(&spec);

        assert!(meta.filename.starts_with("DeepWork_8p00Hz_30min_"));
    }

    #[test]
    fn filenames_are_collision_resistant() {
        let spec = spec_with(&[], 1800.0);
        let a = ResponseMeta::for_spec(&spec).filename;
        let b = ResponseMeta::for_spec(&spec).filename;
        assert_ne!(a, b);
    }

    #[test]
    fn metadata_headers_are_applied_before_streaming() {
        use actix_web::HttpResponse;

        let spec = spec_with(
            &[("carrier", "420"), ("beatStart", "8"), ("beatEnd", "12")],
            600.0,
        );
        let meta = ResponseMeta::for_spec(&spec);

        let mut builder = HttpResponse::Ok();
        meta.apply(&mut builder);
        let response = builder.finish();
        let headers = response.headers();

        assert_eq!(headers.get("X-Carrier-Hz").unwrap(), "420");
        assert_eq!(headers.get("X-Duration-Sec").unwrap(), "600");
        assert_eq!(headers.get("X-Beat-Start-Hz").unwrap(), "8");
        assert_eq!(headers.get("X-Beat-End-Hz").unwrap(), "12");
        assert_eq!(headers.get("X-Sample-Rate").unwrap(), "48000");
        assert_eq!(headers.get("X-Bit-Depth").unwrap(), "24");
        // avg beat = 10 -> Alpha
        assert_eq!(headers.get("X-Session-Label").unwrap(), "Alpha");
        assert!(headers
            .get("Content-Disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"Alpha_8p00-12p00Hz_10min_"));
    }

    #[test]
    fn minutes_round_to_nearest() {
        // 90 seconds rounds up to 2 minutes
        let meta = ResponseMeta::for_spec(&spec_with(&[], 90.0));
        assert!(meta.filename.contains("_2min_"));

        let meta = ResponseMeta::for_spec(&spec_with(&[], 60.0));
        assert!(meta.filename.contains("_1min_"));
    }
}
