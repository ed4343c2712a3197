//! Numeric comparison of resource quantities ("256Mi", "0.5", "200m").

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Value of a quantity in base units, `None` when it cannot be parsed.
pub fn parse(quantity: &Quantity) -> Option<f64> {
    let raw = quantity.0.trim();
    if raw.is_empty() {
        return None;
    }
    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * multiplier);
        }
    }
    // plain numbers, including exponent forms such as "1e3"
    raw.parse::<f64>().ok()
}

/// Quantities compare by value; unparsable ones fall back to string equality.
pub fn equal(a: &Quantity, b: &Quantity) -> bool {
    match (parse(a), parse(b)) {
        (Some(x), Some(y)) => (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1.0),
        _ => a.0 == b.0,
    }
}

/// Unset, empty and zero valued quantities count as zero.
pub fn is_zero(quantity: Option<&Quantity>) -> bool {
    match quantity {
        None => true,
        Some(q) if q.0.trim().is_empty() => true,
        Some(q) => parse(q) == Some(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(parse(&q("256Mi")), Some(256.0 * 1024.0 * 1024.0));
        assert_eq!(parse(&q("1Gi")), Some(1024.0 * 1024.0 * 1024.0));
        assert_eq!(parse(&q("1k")), Some(1000.0));
        assert_eq!(parse(&q("2")), Some(2.0));
        assert_eq!(parse(&q("banana")), None);
    }

    #[test]
    fn equal_compares_values_not_strings() {
        assert!(equal(&q("1Gi"), &q("1024Mi")));
        assert!(equal(&q("0.3"), &q("300m")));
        assert!(equal(&q("1000"), &q("1k")));
        assert!(!equal(&q("256Mi"), &q("384Mi")));
    }

    #[test]
    fn zero_detection() {
        assert!(is_zero(None));
        assert!(is_zero(Some(&q(""))));
        assert!(is_zero(Some(&q("0"))));
        assert!(is_zero(Some(&q("0Mi"))));
        assert!(!is_zero(Some(&q("10m"))));
    }
}
