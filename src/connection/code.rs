//! Phone-number and pairing-code formatting helpers.

/// Strip everything but digits from a caller-supplied phone number.
pub fn normalize_phone_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Format a raw pairing code as groups of four characters joined by `-`.
pub fn format_pairing_code(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(4)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
