//! Collation weights for strings.
//!
//! A string is turned into a sequence of collation elements, one per
//! significant character (or per digit run under numeric ordering). Each
//! element carries a primary (base letter), secondary (accent) and tertiary
//! (case) weight. The elements are then projected into one weight sequence
//! per comparison level enabled by the spec, and the levels are flattened
//! into a byte string whose plain byte order is the collation order.
//!
//! Every emitted weight has a top byte of at least 2, so the level
//! separator `0x01` sorts below any weight: a level that ends early orders
//! first, exactly like a shorter sequence.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::{decompose_canonical, is_combining_mark};

use crate::spec::{Alternate, CaseFirst, CollationSpec, MaxVariable, Strength};

/// Separator written between two levels in the flattened form.
pub(crate) const LEVEL_SEPARATOR: u8 = 0x01;

// Primary groups, in collation order. Stored in the top byte of a primary.
const GROUP_SPACE: u32 = 0x02;
const GROUP_PUNCT: u32 = 0x03;
const GROUP_SYMBOL: u32 = 0x04;
const GROUP_DIGIT: u32 = 0x05;
const GROUP_LETTER: u32 = 0x06;

/// Set in a digit-group primary to mark a numeric run-length element.
const DIGIT_RUN_FLAG: u32 = 0x80_0000;
const DIGIT_RUN_MAX: u32 = 0x7F_FFFF;

/// Tailored letters sort after every code point in the letter group.
const TRAILING_LETTER_BASE: u32 = 0x11_0000;

/// Base for non-primary weights, keeping their top byte at 2.
const LOW_BASE: u32 = 0x0200_0000;
const SECONDARY_COMMON: u32 = LOW_BASE;
const SECONDARY_MARK_BASE: u32 = LOW_BASE + 0x100;
const TERTIARY_FIRST: u32 = LOW_BASE + 1;
const TERTIARY_SECOND: u32 = LOW_BASE + 2;
/// Quaternary weight of every non-variable element under `shifted`.
const QUATERNARY_HIGH: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy)]
struct Element {
    primary: u32,
    secondary: u32,
    tertiary: u32,
}

impl Element {
    fn base(primary: u32, tertiary: u32) -> Self {
        Self {
            primary,
            secondary: SECONDARY_COMMON,
            tertiary,
        }
    }

    fn mark(c: char) -> Self {
        Self {
            primary: 0,
            secondary: SECONDARY_MARK_BASE + c as u32,
            tertiary: 0,
        }
    }

    fn group(&self) -> u32 {
        self.primary >> 24
    }
}

/// Flattened weight bytes of `text` under a non-simple spec. The simple
/// collation compares raw UTF-8 and never reaches this function.
pub(crate) fn weight_bytes(text: &str, spec: &CollationSpec) -> Vec<u8> {
    let levels = levels(text, spec);
    let total: usize = levels.iter().map(|l| l.len() * 4 + 1).sum();
    let mut out = Vec::with_capacity(total);
    for (i, level) in levels.iter().enumerate() {
        if i > 0 {
            out.push(LEVEL_SEPARATOR);
        }
        for w in level {
            out.extend_from_slice(&w.to_be_bytes());
        }
    }
    out
}

/// Per-level weight sequences, in comparison order.
pub(crate) fn levels(text: &str, spec: &CollationSpec) -> Vec<Vec<u32>> {
    let chars = prepare(text, spec);
    let elements = elements(&chars, spec);

    let shifted = spec.alternate == Alternate::Shifted;
    let is_variable = |e: &Element| {
        shifted
            && (e.group() == GROUP_SPACE
                || (e.group() == GROUP_PUNCT && spec.max_variable == MaxVariable::Punct))
    };

    let mut primary = Vec::with_capacity(elements.len());
    let mut secondary = Vec::new();
    let mut tertiary = Vec::new();
    let mut quaternary = Vec::new();

    // Marks following a shifted variable are ignored along with it.
    let mut after_variable = false;
    for e in &elements {
        if e.primary == 0 {
            if !after_variable {
                secondary.push(e.secondary);
            }
            continue;
        }
        if is_variable(e) {
            after_variable = true;
            quaternary.push(e.primary);
            continue;
        }
        after_variable = false;
        primary.push(e.primary);
        secondary.push(e.secondary);
        tertiary.push(e.tertiary);
        quaternary.push(QUATERNARY_HIGH);
    }

    let strength = spec.strength;
    let mut out = vec![primary];
    if strength >= Strength::Secondary {
        if spec.backwards {
            secondary.reverse();
        }
        out.push(secondary);
    }
    if spec.case_level {
        out.push(tertiary.clone());
    }
    if strength >= Strength::Tertiary {
        out.push(tertiary);
    }
    if strength >= Strength::Quaternary && shifted {
        out.push(quaternary);
    }
    if strength == Strength::Identical {
        out.push(chars.iter().map(|c| LOW_BASE + *c as u32).collect());
    }
    out
}

/// Normalized, canonically decomposed characters of `text`. Letters the
/// locale tailors are kept composed so they can be weighted as units.
fn prepare(text: &str, spec: &CollationSpec) -> Vec<char> {
    let tailoring = spec.tailoring;
    if tailoring.is_root() {
        if spec.normalization {
            return text.nfd().collect();
        }
        let mut chars = Vec::with_capacity(text.len());
        for c in text.chars() {
            decompose_canonical(c, |d| chars.push(d));
        }
        return chars;
    }

    let composed: String = text.nfc().collect();
    let mut chars = Vec::with_capacity(composed.len());
    for c in composed.chars() {
        if tailoring.trailing_rank(simple_lowercase(c)).is_some() {
            chars.push(c);
        } else {
            decompose_canonical(c, |d| chars.push(d));
        }
    }
    chars
}

fn elements(chars: &[char], spec: &CollationSpec) -> Vec<Element> {
    let mut out = Vec::with_capacity(chars.len());
    let uncased = case_weight(CaseKind::Uncased, spec.case_first);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if spec.numeric_ordering && c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            push_digit_run(&chars[start..i], uncased, &mut out);
            continue;
        }
        i += 1;

        if let Some(rank) = spec.tailoring.trailing_rank(simple_lowercase(c)) {
            let primary = GROUP_LETTER << 24 | (TRAILING_LETTER_BASE + rank);
            out.push(Element::base(primary, case_weight(case_of(c), spec.case_first)));
            continue;
        }

        match classify(c) {
            CharClass::Ignorable => {}
            CharClass::Mark => out.push(Element::mark(c)),
            CharClass::Base(group) => {
                let sub = if group == GROUP_LETTER {
                    simple_lowercase(c) as u32
                } else if let Some(d) = c.to_digit(10) {
                    d + 1
                } else {
                    c as u32
                };
                let tertiary = case_weight(case_of(c), spec.case_first);
                out.push(Element::base(group << 24 | sub, tertiary));
            }
        }
    }
    out
}

/// A digit run becomes one element holding its significant length followed
/// by one element per significant digit, so longer numbers sort later and
/// equal-length numbers compare digit by digit. Leading zeros are dropped.
fn push_digit_run(run: &[char], tertiary: u32, out: &mut Vec<Element>) {
    let significant = match run.iter().position(|c| *c != '0') {
        Some(first) => &run[first..],
        None => &run[run.len() - 1..],
    };
    let len = (significant.len() as u32).min(DIGIT_RUN_MAX);
    out.push(Element::base(
        GROUP_DIGIT << 24 | DIGIT_RUN_FLAG | len,
        tertiary,
    ));
    for d in significant {
        let value = d.to_digit(10).unwrap_or(0);
        out.push(Element::base(GROUP_DIGIT << 24 | (value + 1), tertiary));
    }
}

enum CharClass {
    Ignorable,
    Mark,
    Base(u32),
}

fn classify(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Base(GROUP_SPACE)
    } else if is_ignorable(c) {
        CharClass::Ignorable
    } else if is_combining_mark(c) {
        CharClass::Mark
    } else if c.is_numeric() {
        CharClass::Base(GROUP_DIGIT)
    } else if c.is_alphabetic() {
        CharClass::Base(GROUP_LETTER)
    } else if is_punctuation(c) {
        CharClass::Base(GROUP_PUNCT)
    } else {
        CharClass::Base(GROUP_SYMBOL)
    }
}

fn is_ignorable(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{206F}'
                | '\u{FE00}'..='\u{FE0F}'
                | '\u{FEFF}'
        )
}

fn is_punctuation(c: char) -> bool {
    match c {
        '!' | '"' | '#' | '%' | '&' | '\'' | '(' | ')' | '*' | ',' | '-' | '.' | '/' | ':'
        | ';' | '?' | '@' | '[' | '\\' | ']' | '_' | '{' | '}' => true,
        '\u{00A1}' | '\u{00A7}' | '\u{00AB}' | '\u{00B6}' | '\u{00B7}' | '\u{00BB}'
        | '\u{00BF}' => true,
        '\u{2000}'..='\u{206F}' | '\u{3000}'..='\u{303F}' => true,
        _ => false,
    }
}

#[derive(Clone, Copy)]
enum CaseKind {
    Uncased,
    Lower,
    Upper,
}

fn case_of(c: char) -> CaseKind {
    if c.is_uppercase() {
        CaseKind::Upper
    } else if c.is_lowercase() {
        CaseKind::Lower
    } else {
        CaseKind::Uncased
    }
}

fn case_weight(kind: CaseKind, case_first: CaseFirst) -> u32 {
    match (case_first, kind) {
        (CaseFirst::Upper, CaseKind::Lower) => TERTIARY_SECOND,
        (CaseFirst::Upper, _) => TERTIARY_FIRST,
        (_, CaseKind::Upper) => TERTIARY_SECOND,
        (_, _) => TERTIARY_FIRST,
    }
}

/// Single-character lowercase mapping; characters whose lowercase form
/// expands to several characters keep their own code point.
fn simple_lowercase(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}
