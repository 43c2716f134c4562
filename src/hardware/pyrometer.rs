//! Pyrometer board session
//!
//! [`Pyrometer`] owns the transport together with the state that only makes
//! sense alongside it: the gains last applied to the board and the calibration
//! record used to turn readings into physical quantities. It is a blocking
//! object; [`PyrometerHandle`] shares one session between async tasks and runs
//! each exchange on the blocking pool so it never stalls the runtime.

use crate::adapters::SerialLink;
use crate::error::{AppResult, PyroError};
use crate::hardware::transport::Transport;
use crate::physics::{CalibrationRecord, PhysicalConverter, ThermistorCurve};
use crate::protocol::{Command, DeviceAddress, GainPair, RawSample};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One pyrometer board behind one exclusively owned link.
pub struct Pyrometer<L: SerialLink> {
    transport: Transport<L>,
    gains: Option<GainPair>,
    calibration: CalibrationRecord,
    curve: Arc<ThermistorCurve>,
}

impl<L: SerialLink> Pyrometer<L> {
    /// Open a session on `link` for the board at `address`.
    ///
    /// Without a calibration record the bundled reference record is used.
    pub fn new(
        link: L,
        address: DeviceAddress,
        timeout: Duration,
        calibration: Option<CalibrationRecord>,
    ) -> Self {
        let calibration = calibration.unwrap_or_default();
        debug!(
            "Opened pyrometer {} on {} (timeout {:?})",
            address,
            link.describe(),
            timeout
        );
        Self {
            transport: Transport::new(link, address, timeout),
            gains: None,
            calibration,
            curve: Arc::new(ThermistorCurve::default()),
        }
    }

    /// Replace the thermistor curve used for temperature lookups.
    pub fn with_curve(mut self, curve: Arc<ThermistorCurve>) -> Self {
        self.curve = curve;
        self
    }

    /// Board address this session talks to.
    pub fn address(&self) -> DeviceAddress {
        self.transport.address()
    }

    /// Gains last applied, or `None` if unknown.
    pub fn gains(&self) -> Option<GainPair> {
        self.gains
    }

    /// Calibration record in use.
    pub fn calibration(&self) -> &CalibrationRecord {
        &self.calibration
    }

    /// Converter bound to the current calibration and gains.
    pub fn converter(&self) -> PhysicalConverter<'_> {
        PhysicalConverter::new(&self.calibration, &self.curve, self.gains)
    }

    /// Program both amplifier potentiometers.
    ///
    /// The board needs a moment before readings reflect the new gains; sampling
    /// straight after this call may return values taken at the old setting.
    pub fn set_gains(&mut self, gains: GainPair, broadcast: bool) -> AppResult<()> {
        let command = Command::SetGains(gains);
        self.guarded(|transport| transport.exchange(&command, broadcast))?;
        debug!("Gains set to {}", gains);
        self.gains = Some(gains);
        Ok(())
    }

    /// Ask the board for one reading.
    ///
    /// Broadcast is rejected: no board answers a broadcast with a frame
    /// addressed to this session.
    pub fn get_measurement(&mut self, broadcast: bool) -> AppResult<RawSample> {
        if broadcast {
            return Err(PyroError::Validation(
                "REPORT cannot be broadcast; replies are matched on the unicast address"
                    .to_string(),
            ));
        }
        self.guarded(|transport| transport.exchange(&Command::Report, false))?
            .ok_or_else(|| PyroError::Framing {
                expected: crate::protocol::REPLY_PAYLOAD_LEN,
                received: 0,
            })
    }

    // A failed read means the board most likely power-cycled and lost its gains.
    fn guarded<T>(
        &mut self,
        exchange: impl FnOnce(&mut Transport<L>) -> AppResult<T>,
    ) -> AppResult<T> {
        let result = exchange(&mut self.transport);
        if let Err(err) = &result {
            if err.is_link_failure() && self.gains.take().is_some() {
                warn!("{}; assuming the board power-cycled, gains are now unknown", err);
            }
        }
        result
    }
}

/// Shared async handle to a [`Pyrometer`].
///
/// The mutex enforces one in-flight exchange per link. Exchanges run on the
/// blocking pool, so a slow or timing-out read never holds up other tasks.
pub struct PyrometerHandle<L: SerialLink> {
    inner: Arc<Mutex<Pyrometer<L>>>,
}

impl<L: SerialLink> Clone for PyrometerHandle<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: SerialLink + 'static> PyrometerHandle<L> {
    /// Share `pyrometer` between tasks.
    pub fn new(pyrometer: Pyrometer<L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pyrometer)),
        }
    }

    /// Run `f` with exclusive access to the session on the blocking pool.
    pub async fn with_blocking<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Pyrometer<L>) -> AppResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut pyrometer = inner.blocking_lock();
            f(&mut pyrometer)
        })
        .await?
    }

    /// See [`Pyrometer::gains`].
    pub async fn gains(&self) -> Option<GainPair> {
        self.inner.lock().await.gains()
    }

    /// Unicast REPORT.
    pub async fn get_measurement(&self) -> AppResult<RawSample> {
        self.with_blocking(|p| p.get_measurement(false)).await
    }

    /// See [`Pyrometer::set_gains`].
    pub async fn set_gains(&self, gains: GainPair, broadcast: bool) -> AppResult<()> {
        self.with_blocking(move |p| p.set_gains(gains, broadcast)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockLink, MockReply};

    fn sample() -> RawSample {
        RawSample {
            reference: 512,
            thermistor: 600,
            thermopile: 700,
        }
    }

    fn pyrometer(link: MockLink) -> Pyrometer<MockLink> {
        Pyrometer::new(
            link,
            DeviceAddress::new(4).unwrap(),
            Duration::from_millis(100),
            None,
        )
    }

    #[test]
    fn test_set_gains_caches_pair() {
        let link = MockLink::scripted([]);
        let mut pyro = pyrometer(link.clone());
        assert_eq!(pyro.gains(), None);
        pyro.set_gains(GainPair::new(10, 20), false).unwrap();
        assert_eq!(pyro.gains(), Some(GainPair::new(10, 20)));
        assert_eq!(link.written(), vec![vec![0x55, 0x04, 0x01, 10, 20]]);
    }

    #[test]
    fn test_broadcast_set_gains_uses_reserved_address() {
        let link = MockLink::scripted([]);
        let mut pyro = pyrometer(link.clone());
        pyro.set_gains(GainPair::new(1, 2), true).unwrap();
        assert_eq!(link.written(), vec![vec![0x55, 0xFF, 0x01, 1, 2]]);
        assert_eq!(pyro.gains(), Some(GainPair::new(1, 2)));
    }

    #[test]
    fn test_broadcast_report_rejected_before_io() {
        let link = MockLink::scripted([]);
        let mut pyro = pyrometer(link.clone());
        assert!(matches!(
            pyro.get_measurement(true),
            Err(PyroError::Validation(_))
        ));
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_timeout_invalidates_gains() {
        let link = MockLink::scripted([MockReply::report(4, sample()), MockReply::Silence]);
        let mut pyro = pyrometer(link);
        pyro.set_gains(GainPair::new(10, 20), false).unwrap();
        assert_eq!(pyro.get_measurement(false).unwrap(), sample());
        assert_eq!(pyro.gains(), Some(GainPair::new(10, 20)));

        let err = pyro.get_measurement(false).unwrap_err();
        assert!(matches!(err, PyroError::ReadTimeout(_)));
        assert_eq!(pyro.gains(), None);
        assert!(matches!(
            pyro.converter().thermopile_power(3.0, 2.5),
            Err(PyroError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_runs_exchanges() {
        let link = MockLink::scripted([MockReply::report(4, sample())]);
        let handle = PyrometerHandle::new(pyrometer(link));
        handle.set_gains(GainPair::new(5, 6), false).await.unwrap();
        assert_eq!(handle.gains().await, Some(GainPair::new(5, 6)));
        assert_eq!(handle.get_measurement().await.unwrap(), sample());
    }

    #[test]
    fn test_custom_curve_drives_temperature_lookup() {
        // Pre-amp 5/6 V puts the thermistor at twice its room resistance.
        let voltage = (5.0 / 6.0) * 255.0 / 51.0;
        let room_voltage = (5.0 / 11.0) * 255.0 / 51.0;

        let mut stock = pyrometer(MockLink::scripted([]));
        stock.set_gains(GainPair::new(1, 51), false).unwrap();
        let stock_temp = stock.converter().thermistor_temperature(voltage).unwrap();

        let curve = ThermistorCurve::from_points(&[(12.0, 2.0), (22.0, 1.0), (32.0, 0.5)]).unwrap();
        let mut custom = pyrometer(MockLink::scripted([])).with_curve(Arc::new(curve));
        custom.set_gains(GainPair::new(1, 51), false).unwrap();
        let converter = custom.converter();

        assert!((converter.thermistor_resistance(voltage).unwrap() - 2.0).abs() < 1e-9);
        assert!((converter.thermistor_temperature(voltage).unwrap() - 12.0).abs() < 1e-9);
        assert!((converter.thermistor_temperature(room_voltage).unwrap() - 22.0).abs() < 1e-9);
        assert!((stock_temp - 12.0).abs() > 1.0);
    }
}
