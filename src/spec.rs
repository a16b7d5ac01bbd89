use std::borrow::Cow;
use std::fmt;

use serde_json::{Map, Value as JsonValue, json};

use crate::locale::Tailoring;

/// Locale identifier that selects plain binary comparison.
pub const SIMPLE_LOCALE: &str = "simple";

/// The implicit collation used when neither the operation nor the collection
/// names one.
pub static SIMPLE: CollationSpec = CollationSpec::simple_with(false);

// ---------------------------------------------------------------------------
// Attribute enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseFirst {
    Off,
    Upper,
    Lower,
}

impl CaseFirst {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseFirst::Off => "off",
            CaseFirst::Upper => "upper",
            CaseFirst::Lower => "lower",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(CaseFirst::Off),
            "upper" => Some(CaseFirst::Upper),
            "lower" => Some(CaseFirst::Lower),
            _ => None,
        }
    }
}

/// Comparison level: which distinctions are significant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strength {
    /// Base characters only.
    Primary = 1,
    /// Adds accents.
    Secondary = 2,
    /// Adds case.
    Tertiary = 3,
    /// Adds shifted punctuation.
    Quaternary = 4,
    /// Adds a code point tie-break.
    Identical = 5,
}

impl Strength {
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Strength::Primary),
            2 => Some(Strength::Secondary),
            3 => Some(Strength::Tertiary),
            4 => Some(Strength::Quaternary),
            5 => Some(Strength::Identical),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alternate {
    NonIgnorable,
    Shifted,
}

impl Alternate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alternate::NonIgnorable => "non-ignorable",
            Alternate::Shifted => "shifted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "non-ignorable" => Some(Alternate::NonIgnorable),
            "shifted" => Some(Alternate::Shifted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaxVariable {
    Punct,
    Space,
}

impl MaxVariable {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaxVariable::Punct => "punct",
            MaxVariable::Space => "space",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "punct" => Some(MaxVariable::Punct),
            "space" => Some(MaxVariable::Space),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// CollationSpec
// ---------------------------------------------------------------------------

/// A fully validated collation. Every attribute carries an explicit value;
/// locale defaults were applied once, when the spec was validated.
///
/// Only `CollationValidator` (and the `SIMPLE` constant) construct these, so
/// holding one is proof the configuration is valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollationSpec {
    pub(crate) locale: Cow<'static, str>,
    pub(crate) case_level: bool,
    pub(crate) case_first: CaseFirst,
    pub(crate) strength: Strength,
    pub(crate) numeric_ordering: bool,
    pub(crate) alternate: Alternate,
    pub(crate) max_variable: MaxVariable,
    pub(crate) normalization: bool,
    pub(crate) backwards: bool,
    pub(crate) ignore_field_order: bool,
    pub(crate) tailoring: Tailoring,
}

impl CollationSpec {
    pub(crate) const fn simple_with(ignore_field_order: bool) -> Self {
        Self {
            locale: Cow::Borrowed(SIMPLE_LOCALE),
            case_level: false,
            case_first: CaseFirst::Off,
            strength: Strength::Tertiary,
            numeric_ordering: false,
            alternate: Alternate::NonIgnorable,
            max_variable: MaxVariable::Punct,
            normalization: false,
            backwards: false,
            ignore_field_order,
            tailoring: Tailoring::Root,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.locale == SIMPLE_LOCALE
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn case_level(&self) -> bool {
        self.case_level
    }

    pub fn case_first(&self) -> CaseFirst {
        self.case_first
    }

    pub fn strength(&self) -> Strength {
        self.strength
    }

    pub fn numeric_ordering(&self) -> bool {
        self.numeric_ordering
    }

    pub fn alternate(&self) -> Alternate {
        self.alternate
    }

    pub fn max_variable(&self) -> MaxVariable {
        self.max_variable
    }

    pub fn normalization(&self) -> bool {
        self.normalization
    }

    pub fn backwards(&self) -> bool {
        self.backwards
    }

    pub fn ignore_field_order(&self) -> bool {
        self.ignore_field_order
    }

    pub fn tailoring(&self) -> Tailoring {
        self.tailoring
    }

    /// Canonical document form with every attribute in a fixed order.
    /// The simple collation reports only its locale (and `ignoreFieldOrder`
    /// when set), since the remaining attributes carry no meaning for it.
    pub fn to_json(&self) -> JsonValue {
        if self.is_simple() {
            let mut map = Map::new();
            map.insert("locale".to_string(), json!(SIMPLE_LOCALE));
            if self.ignore_field_order {
                map.insert("ignoreFieldOrder".to_string(), json!(true));
            }
            return JsonValue::Object(map);
        }

        json!({
            "locale": self.locale(),
            "caseLevel": self.case_level,
            "caseFirst": self.case_first.as_str(),
            "strength": self.strength.level(),
            "numericOrdering": self.numeric_ordering,
            "alternate": self.alternate.as_str(),
            "maxVariable": self.max_variable.as_str(),
            "normalization": self.normalization,
            "backwards": self.backwards,
        })
    }
}

impl Default for CollationSpec {
    fn default() -> Self {
        SIMPLE.clone()
    }
}

impl fmt::Display for CollationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
