use rust_decimal::Decimal;

/// Truncates `value` towards zero to a whole multiple of `step`.
///
/// Quantities and prices are never rounded up so a submitted order can not
/// exceed the exposure that was asked for. A non-positive step leaves the
/// value unchanged.
#[must_use]
pub fn truncate_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).trunc() * step).normalize()
}
