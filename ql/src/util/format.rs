use num_format::{CustomFormat, Grouping};

/// Number format for counters in log output, e.g. `1_250_000`
pub fn number_format() -> CustomFormat {
    CustomFormat::builder()
        .grouping(Grouping::Standard)
        .minus_sign("-")
        .separator("_")
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use num_format::ToFormattedString;

    use super::*;

    #[test]
    fn test_number_format() {
        assert_eq!(1_250_000_usize.to_formatted_string(&number_format()), "1_250_000");
        assert_eq!(42_usize.to_formatted_string(&number_format()), "42");
    }
}
