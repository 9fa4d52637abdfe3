//! DSM501 dust sensor
//!
//! The sensor pulls each output low in proportion to the particle count.
//! The firmware samples both pins on every control loop pass; the low time
//! is folded into a running low-ratio average whenever readings are taken,
//! and the ratio is mapped to a concentration with the sensor's curve.

use log::info;

/// Time the heater needs before readings mean anything
pub const WARMUP_MS: u64 = 60_000;

/// Longest span the running ratio averages over
pub const AVERAGE_SPAN_MS: u64 = 3_600_000;

/// Concentration in mg/m3 for a low ratio given in percent
pub fn concentration(ratio: f32) -> f32 {
    0.000_328_773 * ratio * ratio * ratio - 0.003_687_12 * ratio * ratio + 0.117_507 * ratio
        - 0.042_033_6
}

/// One sensor output
#[derive(Debug, Clone, Copy)]
pub struct DustChannel {
    last_sample: u64,
    folded_at: u64,
    low_ms: u64,
    span_ms: u64,
    ratio: f32,
    last: Option<f32>,
}

impl DustChannel {
    pub const fn new(now_ms: u64) -> Self {
        Self {
            last_sample: now_ms,
            folded_at: now_ms,
            low_ms: 0,
            span_ms: 0,
            ratio: 0.0,
            last: None,
        }
    }

    /// Account the time since the previous sample to the pin's level
    pub fn sample(&mut self, now_ms: u64, low: bool) {
        if low {
            self.low_ms += now_ms.saturating_sub(self.last_sample);
        }
        self.last_sample = now_ms;
    }

    /// Fold the pending low time into the average and return the reading
    ///
    /// Keeps the previous reading while the curve gives nothing positive.
    pub fn fold(&mut self, now_ms: u64) -> Option<f32> {
        let dt = now_ms.saturating_sub(self.folded_at);
        if dt == 0 {
            return self.last;
        }

        let low = self.low_ms.min(dt);
        let weighted = self.span_ms as f32 * self.ratio + 100.0 * low as f32;
        self.span_ms += dt;
        self.ratio = weighted / self.span_ms as f32;
        self.span_ms = self.span_ms.min(AVERAGE_SPAN_MS);
        self.low_ms = 0;
        self.folded_at = now_ms;

        let pm = concentration(self.ratio);
        if pm > 0.0 {
            self.last = Some(pm);
        }
        self.last
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }
}

/// Both DSM501 outputs plus the warm-up gate
#[derive(Debug)]
pub struct Dsm501 {
    booted_at: u64,
    warm: bool,
    pm10: DustChannel,
    pm25: DustChannel,
}

impl Dsm501 {
    pub const fn new(now_ms: u64) -> Self {
        Self {
            booted_at: now_ms,
            warm: false,
            pm10: DustChannel::new(now_ms),
            pm25: DustChannel::new(now_ms),
        }
    }

    pub fn is_warm(&self) -> bool {
        self.warm
    }

    /// Record the pin levels seen on this pass
    pub fn sample(&mut self, now_ms: u64, pm10_low: bool, pm25_low: bool) {
        if !self.warm {
            if now_ms.saturating_sub(self.booted_at) < WARMUP_MS {
                return;
            }
            info!("[DUST] DSM501 ready");
            self.warm = true;
            self.pm10 = DustChannel::new(now_ms);
            self.pm25 = DustChannel::new(now_ms);
            return;
        }
        self.pm10.sample(now_ms, pm10_low);
        self.pm25.sample(now_ms, pm25_low);
    }

    /// Current (pm10, pm25) readings; `None` until there is one
    pub fn readings(&mut self, now_ms: u64) -> (Option<f32>, Option<f32>) {
        if !self.warm {
            return (None, None);
        }
        (self.pm10.fold(now_ms), self.pm25.fold(now_ms))
    }
}
