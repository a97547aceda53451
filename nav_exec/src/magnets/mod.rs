//! # Magnet beacon locator
//!
//! Decodes the 32-bit hall sensor bar bitmask into a lateral offset of the
//! detected floor magnet from the bar centre. A magnet under the bar
//! activates one or two adjacent sensors; the decoded offset is the mean
//! sensor position scaled by the sensor spacing.

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of hall sensors on the bar.
pub const SENSOR_COUNT: u32 = 32;

/// Lateral spacing between adjacent sensors, cm.
pub const SENSOR_SPACING_CM: f64 = 2.5;

/// Sensor index corresponding to the bar centre.
pub const BAR_CENTRE_INDEX: f64 = 16.0;

/// A real magnet activates at most this many sensors. Wider patterns are
/// framing faults (e.g. a stale fill word from a dropped sensor bus frame)
/// and carry no position information.
pub const MAX_PLAUSIBLE_SENSORS: u32 = 4;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One decoded sample of the sensor bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetReading {
    /// The raw bitmask as sampled, bit `i` = sensor `i`.
    pub raw: u32,

    /// Lateral offset of the detected magnet from the bar centre, cm.
    /// Positive towards higher sensor indices. `None` when no magnet is
    /// under the bar or the pattern is implausible.
    pub offset_cm: Option<f64>,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Decode a raw sensor bar bitmask.
pub fn decode(bitmask: u32) -> MagnetReading {
    let active = bitmask.count_ones();

    if active == 0 || active > MAX_PLAUSIBLE_SENSORS {
        return MagnetReading {
            raw: bitmask,
            offset_cm: None,
        };
    }

    let mut index_sum = 0.0;
    for i in 0..SENSOR_COUNT {
        if bitmask & (1 << i) != 0 {
            index_sum += i as f64;
        }
    }
    let mean_index = index_sum / active as f64;

    MagnetReading {
        raw: bitmask,
        offset_cm: Some((mean_index - BAR_CENTRE_INDEX) * SENSOR_SPACING_CM),
    }
}

impl MagnetReading {
    /// True when a magnet position was decoded from this sample.
    pub fn visible(&self) -> bool {
        self.offset_cm.is_some()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_no_bits_is_no_detection() {
        assert_eq!(decode(0).offset_cm, None);
        assert!(!decode(0).visible());
    }

    #[test]
    fn test_centre_sensor_is_zero_offset() {
        assert_eq!(decode(1 << 16).offset_cm, Some(0.0));
    }

    #[test]
    fn test_adjacent_pair_merges_to_midpoint() {
        // Sensors 15 and 16: mean index 15.5, offset -1.25 cm.
        let reading = decode((1 << 15) | (1 << 16));
        assert_eq!(reading.offset_cm, Some(-1.25));
    }

    #[test]
    fn test_extreme_sensors() {
        assert_eq!(decode(1 << 0).offset_cm, Some(-40.0));
        assert_eq!(decode(1 << 31).offset_cm, Some(37.5));
    }

    #[test]
    fn test_stale_fill_pattern_rejected() {
        // Bus fault filler activates half the bar.
        assert_eq!(decode(0xA5A5_A5A5).offset_cm, None);
        assert_eq!(decode(u32::MAX).offset_cm, None);
    }

    #[test]
    fn test_plausibility_boundary() {
        // Four sensors is still plausible, five is not.
        assert!(decode(0b1111 << 10).visible());
        assert!(!decode(0b11111 << 10).visible());
    }
}
