//! Token-level parsers for the extractor's textual output.

/// Trims and collapses runs of whitespace to single spaces.
pub fn simplify(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a percentage token such as `51.7%`, `~12%` or `1,234.5%`.
///
/// Any non-digit prefix is skipped, `,` digit grouping is dropped, and
/// everything after the fraction digits (the `%` sign included) is ignored.
/// Returns a negative value when the token carries no digits.
pub fn parse_percent(token: &str) -> f64 {
    let mut digits = String::new();
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in token.chars() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                digits.push(c);
            }
            ',' if seen_digit && !seen_dot => {}
            '.' if seen_digit && !seen_dot => {
                seen_dot = true;
                digits.push('.');
            }
            _ if !seen_digit => {}
            _ => break,
        }
    }
    if !seen_digit {
        return -1.0;
    }
    digits.parse().unwrap_or(-1.0)
}

/// Parses a size token with a binary or decimal suffix, e.g. `4.12MiB`,
/// `~800.00KiB` or `1024`. Returns a negative value when the token cannot be
/// understood.
pub fn parse_bytes(token: &str) -> i64 {
    let token = token.trim_start_matches('~');
    let number_len = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.' && *c != ',')
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    let (number, suffix) = token.split_at(number_len);
    let number: f64 = match number.replace(',', "").parse() {
        Ok(n) => n,
        Err(_) => return -1,
    };
    let multiplier: f64 = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kib" => 1024.0,
        "kb" | "k" => 1000.0,
        "mib" => 1024.0 * 1024.0,
        "mb" | "m" => 1000.0 * 1000.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "gb" | "g" => 1000.0 * 1000.0 * 1000.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "tb" | "t" => 1000.0 * 1000.0 * 1000.0 * 1000.0,
        _ => return -1,
    };
    (number * multiplier) as i64
}

/// Human-readable byte count for format descriptions.
pub fn format_file_size(bytes: i64) -> String {
    if bytes < 0 {
        return "unknown".to_string();
    }
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64 / 1024.0;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PiB", value)
}
