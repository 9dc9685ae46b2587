// 🔤 Normalizer - canonical match keys for duplicate detection
// Pure functions, no failure modes: empty input yields empty output

/// Strip everything except digits and a single leading `+`
///
/// Example: "+221 77-123 45 67" → "+221771234567"
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim_start();
    let mut out = String::with_capacity(trimmed.len());

    if trimmed.starts_with('+') {
        out.push('+');
    }

    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    out
}

/// Normalized phone without the `+`, for substring comparisons
pub fn phone_digits(raw: &str) -> String {
    let normalized = normalize_phone(raw);
    normalized.trim_start_matches('+').to_string()
}

/// Case-folded, whitespace-trimmed name key
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Case-insensitive name equality
pub fn names_match(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

/// Case-insensitive substring match (`needle` inside `haystack`)
pub fn name_contains(haystack: &str, needle: &str) -> bool {
    let needle = normalize_name(needle);
    if needle.is_empty() {
        return false;
    }
    normalize_name(haystack).contains(&needle)
}

/// Normalized-phone substring match on digits
pub fn phone_contains(haystack: &str, needle: &str) -> bool {
    let needle = phone_digits(needle);
    if needle.is_empty() {
        return false;
    }
    phone_digits(haystack).contains(&needle)
}
