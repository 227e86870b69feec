//! Scalar types shared by every network and the fixed-point scaling rule.
//!
//! No floating point is used anywhere on the signal path. A weight of
//! [`UNIT`] is the "1.0" reference: `to_pulse(v, UNIT) == v`.

/// Global index into the flat token address space.
pub type Token = usize;

/// Token or element count.
pub type Count = usize;

/// Fanin acknowledgment count (a count, not a boolean).
pub type Rc = usize;

/// Signed accumulator unit exchanged between neurons.
pub type Pulse = i32;

/// Signed 16-bit fixed-point token value.
pub type Value = i16;

/// Signed 16-bit fixed-point weight.
pub type Weight = i16;

/// Unit weight: half the weight range.
pub const UNIT: Weight = 1 << 14;

/// Scale `value` by `weight`.
///
/// The product is divided by [`UNIT`] after adding `UNIT - 1` to a
/// non-negative product or subtracting it from a negative one, so the
/// result is symmetric under negation and `to_pulse(0, w) == 0`.
#[inline]
pub fn to_pulse(value: Value, weight: Weight) -> Pulse {
    let unit = UNIT as Pulse;
    let product = value as Pulse * weight as Pulse;
    if product >= 0 {
        (product + (unit - 1)) / unit
    } else {
        (product - (unit - 1)) / unit
    }
}

/// Clamp a pulse into the representable value range.
#[inline]
pub fn saturate(pulse: Pulse) -> Value {
    pulse.clamp(Value::MIN as Pulse, Value::MAX as Pulse) as Value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_value_is_zero_pulse_for_every_weight() {
        for w in [Weight::MIN, -UNIT, -1, 0, 1, UNIT, Weight::MAX] {
            assert_eq!(to_pulse(0, w), 0);
        }
    }

    #[test]
    fn unit_weight_is_identity() {
        for v in [Value::MIN, -1000, -1, 0, 1, 255, 1000, Value::MAX] {
            assert_eq!(to_pulse(v, UNIT), v as Pulse);
        }
    }

    #[test]
    fn negation_symmetry() {
        let weights = [-UNIT, -77, 1, 3, 2048, UNIT / 2, UNIT, Weight::MAX];
        for v in [1, 7, 100, 255, 12345, Value::MAX] {
            for w in weights {
                assert_eq!(to_pulse(-v, w), -to_pulse(v, w), "v={v} w={w}");
            }
        }
    }

    #[test]
    fn small_products_round_away_from_zero() {
        // 1 * 1 is far below UNIT but still yields a unit pulse.
        assert_eq!(to_pulse(1, 1), 1);
        assert_eq!(to_pulse(-1, 1), -1);
        assert_eq!(to_pulse(200, UNIT / 8), 25);
    }

    #[test]
    fn saturate_clamps() {
        assert_eq!(saturate(40_000), Value::MAX);
        assert_eq!(saturate(-40_000), Value::MIN);
        assert_eq!(saturate(-5), -5);
    }
}
