use log::debug;

use crate::{error::LedError, types::Brightness};

/// Anything that can display a warm/cool brightness pair.
pub trait LedSink {
    /// Applies `value`, clamped to `[0, 1]` per channel.
    fn set(&mut self, value: Brightness) -> Result<(), LedError>;

    /// The perceptual pair last applied.
    fn brightness(&self) -> Brightness;

    fn off(&mut self) -> Result<(), LedError> {
        self.set(Brightness::OFF)
    }
}

/// One hardware PWM output.
pub trait PwmChannel {
    fn max_duty(&self) -> u32;

    fn set_duty(&mut self, duty: u32) -> Result<(), LedError>;
}

pub fn gamma_duty(value: f64, gamma: f64, max_duty: u32) -> u32 {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    let duty = (f64::from(max_duty) * value.powf(gamma)).round();
    // `duty` is within [0, max_duty] after the clamp above.
    duty as u32
}

/// Two PWM channels driven through a gamma curve so equal brightness steps
/// look equal to the eye.
pub struct GammaLed<C: PwmChannel> {
    warm: C,
    cool: C,
    gamma: f64,
    current: Brightness,
}

impl<C: PwmChannel> GammaLed<C> {
    pub fn new(warm: C, cool: C, gamma: f64) -> Self {
        Self {
            warm,
            cool,
            gamma,
            current: Brightness::OFF,
        }
    }

    pub fn duties(&self) -> (u32, u32) {
        (
            gamma_duty(self.current.warm, self.gamma, self.warm.max_duty()),
            gamma_duty(self.current.cool, self.gamma, self.cool.max_duty()),
        )
    }
}

impl<C: PwmChannel> LedSink for GammaLed<C> {
    fn set(&mut self, value: Brightness) -> Result<(), LedError> {
        if !value.is_finite() {
            return Err(LedError::NonFinite {
                warm: value.warm,
                cool: value.cool,
            });
        }

        let value = value.clamped();
        let warm_duty = gamma_duty(value.warm, self.gamma, self.warm.max_duty());
        let cool_duty = gamma_duty(value.cool, self.gamma, self.cool.max_duty());
        self.warm.set_duty(warm_duty)?;
        self.cool.set_duty(cool_duty)?;
        self.current = value;

        debug!(
            "led warm={:.3} ({warm_duty}) cool={:.3} ({cool_duty})",
            value.warm, value.cool
        );
        Ok(())
    }

    fn brightness(&self) -> Brightness {
        self.current
    }
}
