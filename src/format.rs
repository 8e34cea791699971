//! Display helpers for presentation layers. Nothing in the engine or store depends on them.

/// Whole-dollar amount with thousands separators, e.g. `-$1,234,568`.
pub fn format_currency(amount: f64) -> String {
    let rounded = amount.round();
    // Anything a u64 cannot hold exactly would otherwise saturate.
    if !rounded.is_finite() || rounded.abs() >= u64::MAX as f64 {
        return "n/a".to_string();
    }
    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{sign}${}", group_thousands(rounded.abs() as u64))
}

/// `value` is already a percentage (5.0 => `5.0%`).
pub fn format_percentage(value: f64, decimals: usize) -> String {
    format!("{value:.decimals$}%")
}

pub fn format_ratio(value: f64) -> String {
    format!("{value:.2}")
}

/// Multiplier display, e.g. `1.25x`.
pub fn format_multiple(value: f64) -> String {
    format!("{value:.2}x")
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
