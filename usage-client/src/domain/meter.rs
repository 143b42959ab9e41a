const MPAN_LEN: usize = 13;
const MAX_SERIAL_LEN: usize = 50;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MeterPointError {
    #[error("mpan must be {MPAN_LEN} digits, got '{0}'")]
    InvalidMpan(String),
    #[error("meter serial must be 1..={MAX_SERIAL_LEN} characters, got '{0}'")]
    InvalidSerial(String),
}

/// An electricity meter point and the serial of the meter installed on it.
///
/// The consumption API is queried per meter, so both values come from run
/// configuration rather than from the API payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterPoint {
    mpan: String,
    serial: String,
}

impl MeterPoint {
    pub fn new(mpan: &str, serial: &str) -> Result<Self, MeterPointError> {
        let mpan = mpan.trim();
        if mpan.len() != MPAN_LEN || !mpan.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MeterPointError::InvalidMpan(mpan.to_string()));
        }

        let serial = serial.trim();
        if serial.is_empty() || serial.len() > MAX_SERIAL_LEN {
            return Err(MeterPointError::InvalidSerial(serial.to_string()));
        }

        Ok(Self {
            mpan: mpan.to_string(),
            serial: serial.to_string(),
        })
    }

    pub fn mpan(&self) -> &str {
        &self.mpan
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl std::fmt::Display for MeterPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.mpan, self.serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_point_accepts_thirteen_digit_mpan() {
        let meter = MeterPoint::new(" 1200012345678 ", "21L1234567").unwrap();
        assert_eq!(meter.mpan(), "1200012345678");
        assert_eq!(meter.serial(), "21L1234567");
        assert_eq!(meter.to_string(), "1200012345678/21L1234567");
    }

    #[test]
    fn meter_point_rejects_short_or_non_numeric_mpan() {
        assert!(matches!(
            MeterPoint::new("12345", "21L1234567"),
            Err(MeterPointError::InvalidMpan(_))
        ));
        assert!(matches!(
            MeterPoint::new("12000123456AB", "21L1234567"),
            Err(MeterPointError::InvalidMpan(_))
        ));
    }

    #[test]
    fn meter_point_rejects_blank_serial() {
        assert_eq!(
            MeterPoint::new("1200012345678", "  "),
            Err(MeterPointError::InvalidSerial(String::new()))
        );
    }
}
