use crate::error::SymbolError;

/// Maximum length of an asset symbol.
pub const MAX_SYMBOL_LENGTH: usize = 16;

/// Validate an asset symbol: 1..=16 characters, uppercase letters and digits,
/// leading character alphabetic.
pub fn validate_symbol(symbol: &str) -> Result<(), SymbolError> {
    if symbol.is_empty() {
        return Err(SymbolError::Empty);
    }
    if symbol.len() > MAX_SYMBOL_LENGTH {
        return Err(SymbolError::TooLong(MAX_SYMBOL_LENGTH));
    }
    let mut chars = symbol.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_uppercase() {
        return Err(SymbolError::InvalidLeadingCharacter);
    }
    for c in symbol.chars() {
        if !c.is_ascii_uppercase() && !c.is_ascii_digit() {
            return Err(SymbolError::InvalidCharacter(c));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_symbol() {
        struct TestCase {
            symbol: &'static str,
            expected: Result<(), SymbolError>,
        }

        let tests = vec![
            TestCase { symbol: "CORE", expected: Ok(()) },
            TestCase { symbol: "USD", expected: Ok(()) },
            TestCase { symbol: "A1B2", expected: Ok(()) },
            TestCase { symbol: "", expected: Err(SymbolError::Empty) },
            TestCase {
                symbol: "ABCDEFGHIJKLMNOPQ",
                expected: Err(SymbolError::TooLong(MAX_SYMBOL_LENGTH)),
            },
            TestCase { symbol: "1BTC", expected: Err(SymbolError::InvalidLeadingCharacter) },
            TestCase { symbol: "btc", expected: Err(SymbolError::InvalidLeadingCharacter) },
            TestCase { symbol: "US-D", expected: Err(SymbolError::InvalidCharacter('-')) },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(validate_symbol(test.symbol), test.expected, "TC{} failed", index);
        }
    }
}
