//! Monetary value extraction from free-text ledger blocks.
//!
//! Ledger observations carry an anchor token (`TR` by default) followed, on the
//! same line or at the start of the next one, by an amount in whatever format the
//! operator typed: `12.840,41`, `12 840,41`, `1'284'041`, `R$ 1000000`. The parser
//! collects every plausible candidate and keeps the largest one.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const CURRENCY_SYMBOLS: [&str; 5] = ["US$", "R$", "$", "€", "£"];
const CURRENCY_CODES: [&str; 4] = ["BRL", "USD", "EUR", "REAIS"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonetaryConfig {
    pub anchor: String,
    /// Non-digit characters skipped after the anchor before giving up on the line.
    pub same_line_window: usize,
    /// Non-digit characters skipped at the start of the following line.
    pub next_line_window: usize,
    pub min_value: Decimal,
    pub max_value: Decimal,
    pub min_digits: usize,
    pub max_digits: usize,
    /// Separator-free tokens at least this long are read as cents.
    pub cents_threshold_digits: usize,
}

impl Default for MonetaryConfig {
    fn default() -> Self {
        Self {
            anchor: "TR".to_string(),
            same_line_window: 40,
            next_line_window: 8,
            min_value: Decimal::new(100, 0),
            max_value: Decimal::new(50_000_000, 0),
            min_digits: 3,
            max_digits: 12,
            cents_threshold_digits: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryCandidate {
    pub source_line: String,
    pub raw_token: String,
    pub cents: i64,
    pub value: Decimal,
}

/// Chosen value, or both sides empty when nothing plausible was found.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedValue {
    pub text: Option<String>,
    pub value: Option<Decimal>,
}

impl ExtractedValue {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonetaryTextParser {
    config: MonetaryConfig,
}

impl MonetaryTextParser {
    pub fn new(config: MonetaryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonetaryConfig {
        &self.config
    }

    /// Picks the largest surviving candidate across all blocks.
    pub fn extract_value<S: AsRef<str>>(&self, blocks: &[S]) -> ExtractedValue {
        let mut best: Option<MonetaryCandidate> = None;
        for candidate in self.candidates(blocks) {
            if best.as_ref().map_or(true, |b| candidate.cents > b.cents) {
                best = Some(candidate);
            }
        }
        match best {
            Some(c) => ExtractedValue {
                text: Some(c.source_line),
                value: Some(c.value),
            },
            None => ExtractedValue::none(),
        }
    }

    pub fn candidates<S: AsRef<str>>(&self, blocks: &[S]) -> Vec<MonetaryCandidate> {
        let mut out = Vec::new();
        for block in blocks {
            // Currency stripping keeps character positions, so scanned lines and
            // display lines stay index-aligned.
            let normalized = normalize_text(block.as_ref());
            let cleaned = strip_currency(&normalized);
            let display: Vec<&str> = normalized.lines().collect();
            let lines: Vec<Vec<char>> = cleaned.lines().map(|l| l.chars().collect()).collect();

            for (idx, line) in lines.iter().enumerate() {
                for anchor_end in anchor_positions(line, &self.config.anchor) {
                    let found = match scan_number(line, anchor_end, self.config.same_line_window) {
                        Some(token) => Some((token, line_text(display[idx]))),
                        None => lines.get(idx + 1).and_then(|next| {
                            scan_number(next, 0, self.config.next_line_window).map(|token| {
                                let joined = format!(
                                    "{} {}",
                                    line_text(display[idx]),
                                    line_text(display[idx + 1])
                                );
                                (token, joined.trim().to_string())
                            })
                        }),
                    };
                    let Some((raw_token, source_line)) = found else {
                        continue;
                    };
                    if let Some(candidate) = self.accept(raw_token, source_line) {
                        out.push(candidate);
                    }
                }
            }
        }
        out
    }

    fn accept(&self, raw_token: String, source_line: String) -> Option<MonetaryCandidate> {
        let digits = raw_token.chars().filter(char::is_ascii_digit).count();
        if digits < self.config.min_digits || digits > self.config.max_digits {
            return None;
        }
        let cents = token_to_cents(&raw_token, self.config.cents_threshold_digits)?;
        let value = Decimal::new(cents, 2);
        if value < self.config.min_value || value > self.config.max_value {
            return None;
        }
        Some(MonetaryCandidate {
            source_line,
            raw_token,
            cents,
            value,
        })
    }
}

/// Folds whitespace, dash and apostrophe variants into their ASCII forms.
///
/// An apostrophe between two digits is a thousands separator and becomes a dot.
pub fn normalize_text(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    for (i, &c) in chars.iter().enumerate() {
        let mapped = match c {
            '\u{00A0}' | '\u{2007}' | '\u{2009}' | '\u{202F}' | '\t' => ' ',
            '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE63}' | '\u{FF0D}' => '-',
            '\'' | '\u{2018}' | '\u{2019}' | '\u{00B4}' | '`' => {
                let between_digits = i > 0
                    && chars[i - 1].is_ascii_digit()
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                if between_digits {
                    '.'
                } else {
                    ' '
                }
            }
            '\r' if chars.get(i + 1) == Some(&'\n') => continue,
            '\r' => '\n',
            other => other,
        };
        out.push(mapped);
    }
    out
}

/// Blanks out currency symbols and codes, keeping character positions stable.
pub fn strip_currency(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(len) = currency_symbol_at(&chars, i) {
            out.extend(std::iter::repeat(' ').take(len));
            i += len;
            continue;
        }
        if chars[i].is_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_alphabetic() {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if CURRENCY_CODES.iter().any(|code| word.eq_ignore_ascii_case(code)) {
                out.extend(std::iter::repeat(' ').take(i - start));
            } else {
                out.push_str(&word);
            }
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn currency_symbol_at(chars: &[char], i: usize) -> Option<usize> {
    if i > 0 && chars[i - 1].is_alphabetic() {
        return None;
    }
    CURRENCY_SYMBOLS
        .iter()
        .map(|symbol| symbol.chars().collect::<Vec<_>>())
        .find(|symbol| chars[i..].starts_with(symbol))
        .map(|symbol| symbol.len())
}

/// Index just past every whole-word occurrence of the anchor.
fn anchor_positions(line: &[char], anchor: &str) -> Vec<usize> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < line.len() {
        if !line[i].is_alphabetic() {
            i += 1;
            continue;
        }
        let start = i;
        while i < line.len() && line[i].is_alphabetic() {
            i += 1;
        }
        let word: String = line[start..i].iter().collect();
        if word.eq_ignore_ascii_case(anchor) {
            out.push(i);
        }
    }
    out
}

fn scan_number(line: &[char], start: usize, window: usize) -> Option<String> {
    let mut skipped = 0;
    for i in start..line.len() {
        if line[i].is_ascii_digit() {
            return Some(read_token(line, i));
        }
        if skipped == window {
            return None;
        }
        skipped += 1;
    }
    None
}

fn read_token(line: &[char], start: usize) -> String {
    let mut token = String::new();
    let mut group = 0usize;
    let mut seen_comma = false;
    for i in start..line.len() {
        let c = line[i];
        let next_is_digit = line.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if c.is_ascii_digit() {
            token.push(c);
            group += 1;
        } else if (c == '.' || c == ',') && next_is_digit {
            seen_comma |= c == ',';
            token.push(c);
            group = 0;
        } else if c == ' ' && !seen_comma && (1..=3).contains(&group) && is_thousands_group(line, i + 1) {
            token.push(c);
            group = 0;
        } else {
            break;
        }
    }
    token
}

fn is_thousands_group(line: &[char], from: usize) -> bool {
    line[from.min(line.len())..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count()
        == 3
}

/// Converts a numeric token to cents.
///
/// The last comma is the decimal separator; dots or grouping spaces alone are
/// thousands separators; separator-free tokens of `cents_threshold` digits or more already are cents.
pub fn token_to_cents(token: &str, cents_threshold: usize) -> Option<i64> {
    let compact: String = token.chars().filter(|c| *c != ' ').collect();
    if let Some(pos) = compact.rfind(',') {
        let whole: String = compact[..pos].chars().filter(char::is_ascii_digit).collect();
        let fraction: String = compact[pos + 1..]
            .chars()
            .filter(char::is_ascii_digit)
            .take(2)
            .collect();
        let whole = if whole.is_empty() {
            0
        } else {
            whole.parse::<i64>().ok()?
        };
        let fraction = format!("{fraction:0<2}").parse::<i64>().ok()?;
        whole.checked_mul(100)?.checked_add(fraction)
    } else if compact.contains('.') || token.contains(' ') {
        let whole: String = compact.chars().filter(char::is_ascii_digit).collect();
        whole.parse::<i64>().ok()?.checked_mul(100)
    } else {
        let units: i64 = compact.parse().ok()?;
        if compact.len() >= cents_threshold {
            Some(units)
        } else {
            units.checked_mul(100)
        }
    }
}

fn line_text(line: &str) -> String {
    line.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn extract(text: &str) -> ExtractedValue {
        MonetaryTextParser::default().extract_value(&[text])
    }

    #[test]
    fn comma_decimal_with_dot_thousands() {
        let got = extract("TR - R$ 12.840,41");
        assert_eq!(got.value, Some(dec("12840.41")));
        assert_eq!(got.text.as_deref(), Some("TR - R$ 12.840,41"));
    }

    #[test]
    fn long_separator_free_token_is_cents() {
        assert_eq!(extract("TR 1000000").value, Some(dec("10000.00")));
    }

    #[test]
    fn short_separator_free_token_is_whole_units() {
        assert_eq!(extract("TR 500").value, Some(dec("500")));
    }

    #[test]
    fn missing_anchor_yields_nothing() {
        assert_eq!(extract("valor 12.840,41 pago"), ExtractedValue::none());
    }

    #[test]
    fn value_below_minimum_is_filtered() {
        let parser = MonetaryTextParser::new(MonetaryConfig {
            min_value: dec("10000"),
            ..MonetaryConfig::default()
        });
        assert!(parser.extract_value(&["TR 50,00"]).is_none());
    }

    #[test]
    fn dots_only_are_thousands_separators() {
        assert_eq!(extract("TR: 1.250.000").value, Some(dec("1250000")));
    }

    #[test]
    fn space_grouped_amount_with_nbsp() {
        assert_eq!(extract("TR\u{00A0}12\u{00A0}840,41").value, Some(dec("12840.41")));
    }

    #[test]
    fn space_grouped_thousands_are_whole_units() {
        assert_eq!(extract("TR R$ 1 250 000").value, Some(dec("1250000")));
        assert_eq!(token_to_cents("1 250 000", 7), Some(125_000_000));
    }

    #[test]
    fn chosen_text_keeps_the_currency_marker() {
        let got = extract("pago TR\u{00A0}BRL 7.300,10 em 2024");
        assert_eq!(got.text.as_deref(), Some("pago TR BRL 7.300,10 em 2024"));
    }

    #[test]
    fn apostrophe_thousands_and_dash_variants() {
        assert_eq!(extract("TR \u{2013} 1\u{2019}250\u{2019}000").value, Some(dec("1250000")));
    }

    #[test]
    fn amount_on_following_line() {
        let got = extract("obs: TR referente ao lote da quadra B conforme escritura\nR$ 35.000,00");
        assert_eq!(got.value, Some(dec("35000.00")));
        assert!(got.text.unwrap().ends_with("35.000,00"));
    }

    #[test]
    fn following_line_window_is_bounded() {
        let got = extract("TR\nvalor ainda a confirmar com o financeiro 35.000,00");
        assert!(got.is_none());
    }

    #[test]
    fn phone_number_like_token_is_rejected() {
        assert!(extract("TR contato 11987654321").is_none());
    }

    #[test]
    fn anchor_must_be_a_whole_word() {
        assert!(extract("CONTRATO 12.840,41").is_none());
    }

    #[test]
    fn largest_candidate_wins_across_blocks() {
        let parser = MonetaryTextParser::default();
        let blocks = ["TR 1.000,00 sinal", "ajuste\nTR 48.500,00 final", "TR 2.000,00"];
        let got = parser.extract_value(&blocks);
        assert_eq!(got.value, Some(dec("48500.00")));
        assert_eq!(parser.candidates(&blocks).len(), 3);
    }

    #[test]
    fn currency_codes_are_stripped() {
        assert_eq!(extract("TR BRL 7.300,10").value, Some(dec("7300.10")));
    }

    #[test]
    fn token_conversion_rules() {
        assert_eq!(token_to_cents("12.840,41", 7), Some(1_284_041));
        assert_eq!(token_to_cents("1,5", 7), Some(150));
        assert_eq!(token_to_cents("12 840", 7), Some(1_284_000));
        assert_eq!(token_to_cents("123456", 7), Some(12_345_600));
        assert_eq!(token_to_cents("1234567", 7), Some(1_234_567));
    }
}
