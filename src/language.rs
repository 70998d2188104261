//! Supported source languages and their lexical tables.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::EcoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Javascript,
    Java,
    C,
    Cpp,
}

/// How a language's source becomes something runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    Interpreted,
    Compiled,
}

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const JAVASCRIPT_KEYWORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof",
    "let", "new", "return", "super", "switch", "this", "throw", "try", "typeof", "var", "void",
    "while", "with", "yield", "enum", "await", "implements", "package", "protected", "static",
    "interface", "private", "public",
];

const JAVA_KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "final", "finally", "float",
    "for", "goto", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "package", "private", "protected", "public", "return", "short", "static",
    "strictfp", "super", "switch", "synchronized", "this", "throw", "throws", "transient", "try",
    "void", "volatile", "while", "record", "var",
];

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary",
];

const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "break",
    "case", "catch", "char", "char8_t", "char16_t", "char32_t", "class", "compl", "const",
    "consteval", "constexpr", "constinit", "const_cast", "continue", "co_await", "co_return",
    "co_yield", "decltype", "default", "delete", "do", "double", "dynamic_cast", "else", "enum",
    "explicit", "export", "extern", "false", "float", "for", "friend", "goto", "if", "inline",
    "int", "long", "mutable", "namespace", "new", "noexcept", "not", "not_eq", "nullptr",
    "operator", "or", "or_eq", "private", "protected", "public", "reflexpr", "register",
    "reinterpret_cast", "requires", "return", "short", "signed", "sizeof", "static",
    "static_assert", "static_cast", "struct", "switch", "synchronized", "template", "this",
    "thread_local", "throw", "true", "try", "typedef", "typeid", "typename", "union", "unsigned",
    "using", "virtual", "void", "volatile", "wchar_t", "while", "xor", "xor_eq",
];

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::Javascript,
        Language::Java,
        Language::C,
        Language::Cpp,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Python => PYTHON_KEYWORDS,
            Self::Javascript => JAVASCRIPT_KEYWORDS,
            Self::Java => JAVA_KEYWORDS,
            Self::C => C_KEYWORDS,
            Self::Cpp => CPP_KEYWORDS,
        }
    }

    pub fn is_keyword(self, word: &str) -> bool {
        self.keywords().contains(&word)
    }

    /// Languages whose comments are `//` and `/* */`.
    pub fn has_c_comments(self) -> bool {
        !matches!(self, Self::Python)
    }

    /// Single-quoted literals are character literals rather than strings.
    pub fn has_char_literals(self) -> bool {
        matches!(self, Self::Java | Self::C | Self::Cpp)
    }

    pub fn build_kind(self) -> BuildKind {
        match self {
            Self::Python | Self::Javascript => BuildKind::Interpreted,
            Self::Java | Self::C | Self::Cpp => BuildKind::Compiled,
        }
    }

    /// Java requires the public class name to match the file, so every language uses `Main`.
    pub fn source_file_name(self) -> &'static str {
        match self {
            Self::Python => "Main.py",
            Self::Javascript => "Main.js",
            Self::Java => "Main.java",
            Self::C => "Main.c",
            Self::Cpp => "Main.cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = EcoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Self::Python),
            "javascript" => Ok(Self::Javascript),
            "java" => Ok(Self::Java),
            "c" => Ok(Self::C),
            "cpp" => Ok(Self::Cpp),
            _ => Err(EcoError::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl clap::ValueEnum for Language {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.tag()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_str() {
        for lang in Language::ALL {
            assert_eq!(lang.tag().parse::<Language>().expect("parse"), lang);
        }
        assert_eq!("Python".parse::<Language>().expect("parse"), Language::Python);
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = "cobol".parse::<Language>().expect_err("should fail");
        assert!(matches!(err, EcoError::UnsupportedLanguage(tag) if tag == "cobol"));
    }

    #[test]
    fn keyword_membership_depends_on_language() {
        assert!(Language::Cpp.is_keyword("namespace"));
        assert!(!Language::C.is_keyword("namespace"));
        assert!(Language::Python.is_keyword("def"));
        assert!(!Language::Javascript.is_keyword("def"));
    }
}
