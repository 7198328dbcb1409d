//! Check-digit and format helpers for Brazilian fiscal identifiers.
//!
//! All functions are pure and operate on ASCII digit strings.

use once_cell::sync::Lazy;
use regex::Regex;

pub const DOCUMENT_KEY_LENGTH: usize = 44;
pub const CPF_LENGTH: usize = 11;
pub const CNPJ_LENGTH: usize = 14;

static NCM_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[0-9]{8}|00)$").unwrap());
static CFOP_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[1235-7][0-9]{3}$").unwrap());

const CNPJ_FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const CNPJ_SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

pub fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

fn digits(value: &str) -> Vec<u32> {
    value.bytes().map(|b| u32::from(b - b'0')).collect()
}

/// Modulo-11 check digit of the first 43 key digits: weights 2..=9 cycling
/// from the rightmost digit, with results 10 and 11 mapped to 0.
pub fn document_key_check_digit(first_43: &str) -> Option<u32> {
    if !is_digits(first_43, DOCUMENT_KEY_LENGTH - 1) {
        return None;
    }
    let sum: u32 = digits(first_43)
        .iter()
        .rev()
        .zip((2..=9).cycle())
        .map(|(digit, weight)| digit * weight)
        .sum();
    let digit = 11 - sum % 11;
    Some(if digit >= 10 { 0 } else { digit })
}

pub fn is_valid_document_key(key: &str) -> bool {
    if !is_digits(key, DOCUMENT_KEY_LENGTH) {
        return false;
    }
    let expected = document_key_check_digit(&key[..DOCUMENT_KEY_LENGTH - 1]);
    let actual = key[DOCUMENT_KEY_LENGTH - 1..].parse::<u32>().ok();
    expected.is_some() && expected == actual
}

/// Model code (digits 21-22) of a well-formed key.
pub fn key_model(key: &str) -> Option<&str> {
    is_digits(key, DOCUMENT_KEY_LENGTH).then(|| &key[20..22])
}

/// Issuer CNPJ (digits 7-20) of a well-formed key.
pub fn key_issuer(key: &str) -> Option<&str> {
    is_digits(key, DOCUMENT_KEY_LENGTH).then(|| &key[6..20])
}

fn weighted_check(digits: &[u32], weights: &[u32]) -> u32 {
    let rest = digits
        .iter()
        .zip(weights)
        .map(|(digit, weight)| digit * weight)
        .sum::<u32>()
        % 11;
    if rest < 2 {
        0
    } else {
        11 - rest
    }
}

pub fn is_valid_cnpj(value: &str) -> bool {
    if !is_digits(value, CNPJ_LENGTH) {
        return false;
    }
    let d = digits(value);
    weighted_check(&d[..12], &CNPJ_FIRST_WEIGHTS) == d[12]
        && weighted_check(&d[..13], &CNPJ_SECOND_WEIGHTS) == d[13]
}

pub fn is_valid_cpf(value: &str) -> bool {
    if !is_digits(value, CPF_LENGTH) {
        return false;
    }
    let d = digits(value);
    // Repeated digits pass the arithmetic but are never issued.
    if d.iter().all(|digit| *digit == d[0]) {
        return false;
    }
    let first: Vec<u32> = (2..=10).rev().collect();
    let second: Vec<u32> = (2..=11).rev().collect();
    weighted_check(&d[..9], &first) == d[9] && weighted_check(&d[..10], &second) == d[10]
}

/// A tax id is either an 11-digit CPF or a 14-digit CNPJ.
pub fn is_tax_id_format(value: &str) -> bool {
    is_digits(value, CPF_LENGTH) || is_digits(value, CNPJ_LENGTH)
}

/// Check digits of a CPF or CNPJ; false for any other shape.
pub fn is_valid_tax_id(value: &str) -> bool {
    match value.len() {
        CPF_LENGTH => is_valid_cpf(value),
        CNPJ_LENGTH => is_valid_cnpj(value),
        _ => false,
    }
}

pub fn is_valid_ncm(value: &str) -> bool {
    NCM_REGEX.is_match(value)
}

pub fn is_valid_cfop(value: &str) -> bool {
    CFOP_REGEX.is_match(value)
}
