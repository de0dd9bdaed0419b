//! Check-digit validators used to discard false-positive PII matches.
//!
//! A numeric string that merely looks like a document number is not
//! redacted unless its checksum holds; this keeps ordinary numbers
//! (order ids, measurements) out of the redaction path.

/// CPF check digits (modulo-11 over the first nine, then ten, digits).
///
/// Accepts formatted or bare input; anything that is not exactly eleven
/// digits after stripping separators fails.
pub fn cpf_is_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    // All-equal sequences (000..., 111...) pass the arithmetic but are
    // reserved invalid numbers.
    if digits.windows(2).all(|w| w[0] == w[1]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let weight_start = (len + 1) as u32;
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, d)| d * (weight_start - i as u32))
            .sum();
        let rem = (sum * 10) % 11;
        if rem == 10 {
            0
        } else {
            rem
        }
    };

    check(9) == digits[9] && check(10) == digits[10]
}

/// CNS (Cartão Nacional de Saúde) weighted-sum check.
///
/// Definitive numbers start with 1 or 2, provisional with 7, 8 or 9;
/// both families satisfy `sum(digit[i] * (15 - i)) % 11 == 0`.
pub fn cns_is_valid(candidate: &str) -> bool {
    let digits: Vec<u64> = candidate
        .chars()
        .filter_map(|c| c.to_digit(10).map(u64::from))
        .collect();
    if digits.len() != 15 {
        return false;
    }
    if !matches!(digits[0], 1 | 2 | 7 | 8 | 9) {
        return false;
    }
    let sum: u64 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| d * (15 - i as u64))
        .sum();
    sum % 11 == 0
}

/// Luhn algorithm for card numbers.
pub fn luhn_is_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }

    let mut sum = 0u32;
    let mut double = false;
    for &digit in digits.iter().rev() {
        let mut d = digit;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpf_valid() {
        // Well-known fixture numbers with correct check digits.
        assert!(cpf_is_valid("529.982.247-25"));
        assert!(cpf_is_valid("52998224725"));
    }

    #[test]
    fn test_cpf_invalid_check_digit() {
        assert!(!cpf_is_valid("529.982.247-26"));
        assert!(!cpf_is_valid("123.456.789-00"));
    }

    #[test]
    fn test_cpf_rejects_repeated_digits() {
        assert!(!cpf_is_valid("111.111.111-11"));
        assert!(!cpf_is_valid("00000000000"));
    }

    #[test]
    fn test_cpf_rejects_wrong_length() {
        assert!(!cpf_is_valid("5299822472"));
        assert!(!cpf_is_valid("529982247255"));
    }

    #[test]
    fn test_cns_valid() {
        // sum(d[i] * (15 - i)) % 11 == 0 holds for this fixture.
        assert!(cns_is_valid("201447612350006"));
    }

    #[test]
    fn test_cns_invalid() {
        assert!(!cns_is_valid("201447612350007"));
        assert!(!cns_is_valid("301447612350006")); // bad leading digit
        assert!(!cns_is_valid("20144761235000")); // short
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_is_valid("4532015112830366"));
        assert!(luhn_is_valid("4532-0151-1283-0366"));
        assert!(!luhn_is_valid("1234567890123456"));
    }
}
