//! Delay-locked-loop smoothing filter.
//!
//! Raw per-period timing errors from the driver are too noisy to feed back
//! directly as a clock correction. A second-order low-pass with a 60 dB
//! settling horizon expressed in audio periods smooths them; the output is a
//! signed nanosecond correction with unity DC gain, so a constant error
//! converges to itself.

/// Second-order low-pass over timing errors, Direct Form II transposed.
#[derive(Debug, Clone)]
pub struct DllFilter {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
    period_ns: f64,
}

impl DllFilter {
    /// `t60_periods` is the settling horizon in audio periods, `period_ns`
    /// the nominal period length used to normalize the error.
    pub fn new(t60_periods: f64, period_ns: f64) -> Self {
        let omega = 1000f64.ln() / t60_periods;
        let alpha = omega.sin();
        let cosw = omega.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cosw) / 2.0 / a0,
            b1: (1.0 - cosw) / a0,
            b2: (1.0 - cosw) / 2.0 / a0,
            a1: -2.0 * cosw / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
            period_ns,
        }
    }

    /// Feeds one raw timing error (nanoseconds) and returns the smoothed
    /// correction (nanoseconds). Runs on the real-time thread every period.
    #[inline]
    pub fn tick(&mut self, error_ns: f64) -> f64 {
        let x = error_ns / self.period_ns;
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y * self.period_ns
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}
