use crate::spec::{Alternate, CaseFirst};

/// Locale-specific ordering strategy, resolved once when a spec is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tailoring {
    /// Root ordering: letters by base letter, accents and case on later levels.
    Root,
    /// The listed letters are independent base letters sorting after `z`,
    /// in list order, instead of accented variants of another letter.
    TrailingLetters(&'static [char]),
}

impl Tailoring {
    /// Rank of a (lowercase) letter among the tailored trailing letters.
    pub(crate) fn trailing_rank(&self, c: char) -> Option<u32> {
        match self {
            Tailoring::Root => None,
            Tailoring::TrailingLetters(letters) => {
                letters.iter().position(|l| *l == c).map(|p| p as u32)
            }
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        matches!(self, Tailoring::Root)
    }
}

/// Attribute defaults a locale imposes when the configuration leaves them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleDefaults {
    pub case_first: CaseFirst,
    pub alternate: Alternate,
    pub backwards: bool,
}

impl LocaleDefaults {
    pub const STANDARD: LocaleDefaults = LocaleDefaults {
        case_first: CaseFirst::Off,
        alternate: Alternate::NonIgnorable,
        backwards: false,
    };
}

impl Default for LocaleDefaults {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleRules {
    pub tailoring: Tailoring,
    pub defaults: LocaleDefaults,
}

impl LocaleRules {
    pub const ROOT: LocaleRules = LocaleRules {
        tailoring: Tailoring::Root,
        defaults: LocaleDefaults::STANDARD,
    };

    const fn trailing(letters: &'static [char]) -> Self {
        LocaleRules {
            tailoring: Tailoring::TrailingLetters(letters),
            defaults: LocaleDefaults::STANDARD,
        }
    }
}

/// Read-only source of locale ordering rules and defaults.
///
/// Implementations must be immutable after construction: the same locale
/// always yields the same rules for a given `table_version`.
pub trait LocaleProvider: Send + Sync {
    /// Rules for a locale identifier, or `None` if the locale is unknown.
    fn rules(&self, locale: &str) -> Option<LocaleRules>;

    /// Version of the ordering tables. Keys persisted under one version are
    /// stale under any other.
    fn table_version(&self) -> u32;
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

pub const BUILTIN_TABLE_VERSION: u32 = 1;

const SWEDISH_LETTERS: &[char] = &['å', 'ä', 'ö'];
const DANISH_LETTERS: &[char] = &['æ', 'ø', 'å'];

const FRENCH_CANADIAN: LocaleRules = LocaleRules {
    tailoring: Tailoring::Root,
    defaults: LocaleDefaults {
        backwards: true,
        ..LocaleDefaults::STANDARD
    },
};

const DANISH: LocaleRules = LocaleRules {
    tailoring: Tailoring::TrailingLetters(DANISH_LETTERS),
    defaults: LocaleDefaults {
        case_first: CaseFirst::Upper,
        ..LocaleDefaults::STANDARD
    },
};

const THAI: LocaleRules = LocaleRules {
    tailoring: Tailoring::Root,
    defaults: LocaleDefaults {
        alternate: Alternate::Shifted,
        ..LocaleDefaults::STANDARD
    },
};

static BUILTIN_TABLE: &[(&str, LocaleRules)] = &[
    ("ar", LocaleRules::ROOT),
    ("bg", LocaleRules::ROOT),
    ("ca", LocaleRules::ROOT),
    ("cs", LocaleRules::ROOT),
    ("da", DANISH),
    ("de", LocaleRules::ROOT),
    ("de_AT", LocaleRules::ROOT),
    ("el", LocaleRules::ROOT),
    ("en", LocaleRules::ROOT),
    ("en_GB", LocaleRules::ROOT),
    ("en_US", LocaleRules::ROOT),
    ("es", LocaleRules::ROOT),
    ("fi", LocaleRules::trailing(SWEDISH_LETTERS)),
    ("fr", LocaleRules::ROOT),
    ("fr_CA", FRENCH_CANADIAN),
    ("he", LocaleRules::ROOT),
    ("hu", LocaleRules::ROOT),
    ("it", LocaleRules::ROOT),
    ("ja", LocaleRules::ROOT),
    ("ko", LocaleRules::ROOT),
    ("nb", LocaleRules::trailing(DANISH_LETTERS)),
    ("nl", LocaleRules::ROOT),
    ("pl", LocaleRules::ROOT),
    ("pt", LocaleRules::ROOT),
    ("ro", LocaleRules::ROOT),
    ("ru", LocaleRules::ROOT),
    ("sv", LocaleRules::trailing(SWEDISH_LETTERS)),
    ("th", THAI),
    ("tr", LocaleRules::ROOT),
    ("uk", LocaleRules::ROOT),
    ("vi", LocaleRules::ROOT),
    ("zh", LocaleRules::ROOT),
];

/// The locale table compiled into the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLocales;

impl BuiltinLocales {
    pub fn locales() -> impl Iterator<Item = &'static str> {
        BUILTIN_TABLE.iter().map(|(id, _)| *id)
    }
}

impl LocaleProvider for BuiltinLocales {
    fn rules(&self, locale: &str) -> Option<LocaleRules> {
        BUILTIN_TABLE
            .iter()
            .find(|(id, _)| *id == locale)
            .map(|(_, rules)| *rules)
    }

    fn table_version(&self) -> u32 {
        BUILTIN_TABLE_VERSION
    }
}
