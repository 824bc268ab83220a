use thiserror::Error;

/// Errors produced when a raw phone string cannot be shaped into E.164.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidPhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number must have 10-15 digits, got {0}")]
    InvalidLength(usize),
}

/// Validates and reformats raw phone strings into E.164.
///
/// Numbers without a country prefix get the configured default country code,
/// with leading zeroes of the local form stripped first. The default market of
/// the original deployment is Kenya (`254`); the code is injected so other
/// markets configure their own.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    default_country_code: String,
}

impl PhoneNormalizer {
    pub fn new(default_country_code: impl Into<String>) -> Self {
        Self {
            default_country_code: default_country_code.into(),
        }
    }

    /// Normalizes `raw` into `+` followed by 10-15 digits.
    ///
    /// Pure and deterministic; idempotent for any input it accepts.
    pub fn normalize(&self, raw: &str) -> Result<String, InvalidPhoneError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(InvalidPhoneError::Empty);
        }

        let has_country_code =
            raw.trim_start().starts_with('+') || digits.starts_with(&self.default_country_code);

        let full = if has_country_code {
            digits
        } else {
            let local = digits.trim_start_matches('0');
            if local.is_empty() {
                return Err(InvalidPhoneError::Empty);
            }
            format!("{}{}", self.default_country_code, local)
        };

        if !(10..=15).contains(&full.len()) {
            return Err(InvalidPhoneError::InvalidLength(full.len()));
        }

        Ok(format!("+{full}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> PhoneNormalizer {
        PhoneNormalizer::new("254")
    }

    #[test]
    fn keeps_e164_input_unchanged() {
        let result = normalizer().normalize("+254712345678").expect("valid");
        assert_eq!(result, "+254712345678");
    }

    #[test]
    fn strips_formatting_characters() {
        let result = normalizer().normalize("+254 (712) 345-678").expect("valid");
        assert_eq!(result, "+254712345678");
    }

    #[test]
    fn applies_default_country_code_to_local_numbers() {
        let result = normalizer().normalize("0712345678").expect("valid");
        assert_eq!(result, "+254712345678");
    }

    #[test]
    fn keeps_bare_country_code_numbers() {
        let result = normalizer().normalize("254712345678").expect("valid");
        assert_eq!(result, "+254712345678");
    }

    #[test]
    fn country_code_is_configurable() {
        let result = PhoneNormalizer::new("44")
            .normalize("07700900123")
            .expect("valid");
        assert_eq!(result, "+447700900123");
    }

    #[test]
    fn normalize_is_idempotent() {
        let normalizer = normalizer();
        for raw in ["+254712345678", "0712345678", "254 712 345 678"] {
            let once = normalizer.normalize(raw).expect("valid");
            let twice = normalizer.normalize(&once).expect("still valid");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn rejects_empty_and_non_numeric_input() {
        assert_eq!(normalizer().normalize(""), Err(InvalidPhoneError::Empty));
        assert_eq!(
            normalizer().normalize("not-a-phone"),
            Err(InvalidPhoneError::Empty)
        );
        assert_eq!(normalizer().normalize("000"), Err(InvalidPhoneError::Empty));
    }

    #[test]
    fn rejects_out_of_range_digit_counts() {
        assert_eq!(
            normalizer().normalize("+12345"),
            Err(InvalidPhoneError::InvalidLength(5))
        );
        assert_eq!(
            normalizer().normalize("+1234567890123456"),
            Err(InvalidPhoneError::InvalidLength(16))
        );
    }
}
