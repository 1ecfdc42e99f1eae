//! # Signal Graph Construction
//!
//! Builds the renderer-agnostic description of one session's audio pipeline:
//! the dual-channel tone generator expressions, the tone post-processing
//! chain, the optional music-bed chain, and the mix/limit tail. The output is
//! a `RenderPlan` consumed exactly once by the render orchestrator; nothing
//! here touches a process or a file.
//!
//! ## Phase-Accurate Beat Ramp:
//! The right channel's instantaneous frequency must ramp linearly from
//! `carrier + beat_start` to `carrier + beat_end` over the full duration.
//! Expressing the ramp as a closed-form quadratic phase term (the integral of
//! the instantaneous frequency) keeps the waveform continuous — a sequence of
//! stepped frequency segments would click at every boundary.
//!
//! - left phase:  `2π·fc·t`
//! - right phase: `2π·((fc+bs)·t + 0.5·k·t²)` with `k = (be−bs)/duration`
//!
//! When `bs == be` the slope is exactly zero and the quadratic term is
//! omitted from the emitted expression.

use crate::session::params::SessionSpec;
use std::path::PathBuf;

/// Fixed output format: 48 kHz, stereo, signed 24-bit PCM in a WAV container.
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;
pub const OUTPUT_CHANNELS: u16 = 2;
pub const OUTPUT_BIT_DEPTH: u16 = 24;

/// Peak ceiling applied to the final mix, with or without music. Protects
/// against tone-only clipping at the fade boundaries.
const LIMITER_CEILING: f64 = 0.95;

/// Fully-resolved, immutable description of one render.
///
/// `tone_source` is the synthetic generator input handed to the renderer
/// verbatim; `filter_graph` is the textual filter program covering the tone
/// post chain, the optional music chain, and the mix/limit tail. Looping the
/// music bed is *not* part of the graph — it is an input-level instruction
/// (`loop_music`) the orchestrator attaches to the music input, which the
/// graph then trims to the exact duration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub tone_source: String,
    pub filter_graph: String,
    pub music_input: Option<PathBuf>,
    pub loop_music: bool,
}

impl RenderPlan {
    pub fn has_music(&self) -> bool {
        self.music_input.is_some()
    }
}

/// Build the left/right tone generator expressions for a spec.
///
/// Both channels carry the tone gain inside the expression so the generator
/// output is already at its mix level.
pub fn channel_expressions(spec: &SessionSpec) -> (String, String) {
    let fc = spec.carrier_hz;
    let base = spec.carrier_hz + spec.beat_start_hz;
    let k = (spec.beat_end_hz - spec.beat_start_hz) / spec.duration_sec;
    let gain = spec.tone_gain;

    let left = format!("sin(2*PI*{fc}*t)*{gain}");
    let right = if k == 0.0 {
        format!("sin(2*PI*{base}*t)*{gain}")
    } else {
        let half_k = 0.5 * k;
        format!("sin(2*PI*({base}*t+{half_k}*t*t))*{gain}")
    };

    (left, right)
}

/// Construct the complete render plan for a resolved spec.
pub fn build_render_plan(spec: &SessionSpec) -> RenderPlan {
    let (left, right) = channel_expressions(spec);
    let dur = spec.duration_sec;

    // Two-expression aevalsrc yields a stereo source; duration is bounded at
    // the generator so the tone input ends by itself.
    let tone_source = format!(
        "aevalsrc={left}|{right}:s={OUTPUT_SAMPLE_RATE}:d={dur}"
    );

    // Tone post chain: rebase timestamps onto the sample counter so trims and
    // mixes downstream are frame-exact, then fade both edges. A zero fade
    // emits no fade filters at all.
    let mut tone_chain = vec!["asetpts=N/SR/TB".to_string()];
    if spec.fade_sec > 0.0 {
        let fade = spec.fade_sec;
        let out_start = (dur - fade).max(0.0);
        tone_chain.push(format!("afade=t=in:st=0:d={fade}"));
        tone_chain.push(format!("afade=t=out:st={out_start}:d={fade}"));
    }

    let limiter = format!("alimiter=limit={LIMITER_CEILING}");

    let filter_graph = match &spec.music {
        None => {
            // Tone-only: single input, post chain straight into the limiter.
            let mut stages = tone_chain;
            stages.push(limiter);
            format!("[0:a]{}[out]", stages.join(","))
        }
        Some(_) => {
            // Music present: the music input arrives pre-looped (input-level
            // instruction), so the chain only has to normalize its format,
            // rebase its clock, trim the tail and set its level. The mix sums
            // both streams at their upstream gains — normalize=0 keeps the
            // levels reproducible across renders.
            let music_chain = [
                format!("aresample={OUTPUT_SAMPLE_RATE}"),
                "aformat=channel_layouts=stereo".to_string(),
                "asetpts=N/SR/TB".to_string(),
                format!("atrim=0:{dur}"),
                format!("volume={}", spec.music_gain),
            ];
            format!(
                "[1:a]{tones}[tones];[0:a]{music}[music];[tones][music]amix=inputs=2:normalize=0,{limiter}[out]",
                tones = tone_chain.join(","),
                music = music_chain.join(","),
            )
        }
    };

    RenderPlan {
        tone_source,
        filter_graph,
        music_input: spec.music.clone(),
        loop_music: spec.music.is_some(),
    }
}
