//! Opt-in per-stage timing for the deconvolution loop.
//!
//! Set `RICIAN_PROFILE_TIMING=1` to get one `rician_profile ...` line on stderr
//! per deconvolution call.

use std::time::Instant;

pub(crate) const PROFILE_TIMING_ENV: &str = "RICIAN_PROFILE_TIMING";

pub(crate) fn resolve_profile_timing() -> bool {
    std::env::var(PROFILE_TIMING_ENV)
        .ok()
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    let v = value.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

/// Stages of one deconvolution iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Diffusivity,
    Blur,
    Residual,
    Update,
}

/// Accumulated wall time per stage, in nanoseconds.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StageTimings {
    enabled: bool,
    started: Option<Instant>,
    diffusivity_ns: u128,
    blur_ns: u128,
    residual_ns: u128,
    update_ns: u128,
}

impl StageTimings {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started: enabled.then(Instant::now),
            ..Default::default()
        }
    }

    /// Run `body`, charging its wall time to `stage` when timing is enabled.
    #[inline]
    pub(crate) fn time<R>(&mut self, stage: Stage, body: impl FnOnce() -> R) -> R {
        if !self.enabled {
            return body();
        }
        let t = Instant::now();
        let ret = body();
        let elapsed = t.elapsed().as_nanos();
        match stage {
            Stage::Diffusivity => self.diffusivity_ns += elapsed,
            Stage::Blur => self.blur_ns += elapsed,
            Stage::Residual => self.residual_ns += elapsed,
            Stage::Update => self.update_ns += elapsed,
        }
        ret
    }

    /// Print the summary line if timing is enabled.
    pub(crate) fn report(&self, shape: &str, iterations: usize) {
        if !self.enabled {
            return;
        }
        let total_ns = self
            .started
            .map(|t| t.elapsed().as_nanos())
            .unwrap_or_default();
        let ms = |ns: u128| ns as f64 / 1.0e6;
        eprintln!(
            "rician_profile size={} iterations={} wall_ms={:.3} diffusivity_ms={:.3} blur_ms={:.3} residual_ms={:.3} update_ms={:.3}",
            shape,
            iterations,
            ms(total_ns),
            ms(self.diffusivity_ns),
            ms(self.blur_ns),
            ms(self.residual_ns),
            ms(self.update_ns),
        );
    }
}
