/// Keeps only the ASCII digits of `field` and reads them as one integer.
///
/// `" 1048576 kB"` yields `1048576`; a field with no digits, or one whose
/// digits overflow `u64`, yields `None`.
pub fn digits_only(field: &str) -> Option<u64> {
    let digits: String = field.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Rounds to one decimal place, ties to even (`1024.25` becomes `1024.2`).
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}
