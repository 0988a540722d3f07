use crate::error::{ChunkerError, Result};

/// Tree-sitter grammar backing the code chunker for one extension family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Rust,
    Python,
    Javascript,
    Typescript,
    Tsx,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
}

impl Grammar {
    /// Fixed extension → grammar mapping. Extensions without a grammar
    /// (e.g. `.swift`, `.kt`) return `None` and fall back to plaintext.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "rs" => Some(Self::Rust),
            "py" | "pyw" => Some(Self::Python),
            "js" | "mjs" | "cjs" => Some(Self::Javascript),
            "ts" => Some(Self::Typescript),
            "tsx" | "jsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(Self::Cpp),
            "cs" => Some(Self::CSharp),
            "rb" => Some(Self::Ruby),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "c_sharp",
            Self::Ruby => "ruby",
        }
    }

    /// Tree-sitter language instance for this grammar.
    pub fn language(self) -> Result<tree_sitter::Language> {
        match self {
            Self::Rust => Ok(tree_sitter_rust::LANGUAGE.into()),
            Self::Python => Ok(tree_sitter_python::LANGUAGE.into()),
            Self::Javascript => Ok(tree_sitter_javascript::LANGUAGE.into()),
            Self::Typescript => Ok(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Self::Tsx => Ok(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Self::Go => Ok(tree_sitter_go::LANGUAGE.into()),
            Self::Java => Ok(tree_sitter_java::LANGUAGE.into()),
            Self::C => Ok(tree_sitter_c::LANGUAGE.into()),
            Self::Cpp => Ok(tree_sitter_cpp::LANGUAGE.into()),
            Self::CSharp => Ok(tree_sitter_c_sharp::LANGUAGE.into()),
            Self::Ruby => Ok(tree_sitter_ruby::LANGUAGE.into()),
        }
    }

    /// Node kinds that count as top-level definitions.
    ///
    /// Imports fold into the preamble everywhere except Rust, whose `use`
    /// declarations are definition-like (they carry searchable paths).
    #[must_use]
    pub const fn definition_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "struct_item",
                "enum_item",
                "union_item",
                "impl_item",
                "trait_item",
                "mod_item",
                "type_item",
                "const_item",
                "static_item",
                "use_declaration",
                "macro_definition",
            ],
            Self::Python => &[
                "function_definition",
                "class_definition",
                "decorated_definition",
            ],
            Self::Javascript => &[
                "function_declaration",
                "generator_function_declaration",
                "class_declaration",
                "lexical_declaration",
                "variable_declaration",
                "export_statement",
            ],
            Self::Typescript | Self::Tsx => &[
                "function_declaration",
                "generator_function_declaration",
                "class_declaration",
                "abstract_class_declaration",
                "interface_declaration",
                "type_alias_declaration",
                "enum_declaration",
                "lexical_declaration",
                "variable_declaration",
                "export_statement",
                "module",
                "internal_module",
            ],
            Self::Go => &[
                "function_declaration",
                "method_declaration",
                "type_declaration",
                "const_declaration",
                "var_declaration",
            ],
            Self::Java => &[
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
                "record_declaration",
                "annotation_type_declaration",
            ],
            Self::C => &[
                "function_definition",
                "struct_specifier",
                "enum_specifier",
                "union_specifier",
                "type_definition",
                "declaration",
            ],
            Self::Cpp => &[
                "function_definition",
                "struct_specifier",
                "enum_specifier",
                "union_specifier",
                "type_definition",
                "declaration",
                "class_specifier",
                "namespace_definition",
                "template_declaration",
            ],
            Self::CSharp => &[
                "class_declaration",
                "interface_declaration",
                "struct_declaration",
                "enum_declaration",
                "record_declaration",
                "namespace_declaration",
                "delegate_declaration",
            ],
            Self::Ruby => &["method", "singleton_method", "class", "module"],
        }
    }

    #[must_use]
    pub fn is_definition_kind(self, kind: &str) -> bool {
        self.definition_kinds().contains(&kind)
    }

    /// Comment node kinds are tagged uniformly across grammars.
    #[must_use]
    pub fn is_comment_kind(kind: &str) -> bool {
        matches!(kind, "comment" | "line_comment" | "block_comment")
    }
}

/// Grammar lookup that errors instead of returning `None`, for callers that
/// already committed to AST chunking.
pub(crate) fn grammar_for_extension(ext: &str) -> Result<Grammar> {
    Grammar::from_extension(ext).ok_or_else(|| ChunkerError::UnsupportedLanguage(ext.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping() {
        assert_eq!(Grammar::from_extension("rs"), Some(Grammar::Rust));
        assert_eq!(Grammar::from_extension("TSX"), Some(Grammar::Tsx));
        assert_eq!(Grammar::from_extension("jsx"), Some(Grammar::Tsx));
        assert_eq!(Grammar::from_extension("swift"), None);
        assert_eq!(Grammar::from_extension("kt"), None);
    }

    #[test]
    fn languages_load() {
        for grammar in [
            Grammar::Rust,
            Grammar::Python,
            Grammar::Javascript,
            Grammar::Typescript,
            Grammar::Tsx,
            Grammar::Go,
            Grammar::Java,
            Grammar::C,
            Grammar::Cpp,
            Grammar::CSharp,
            Grammar::Ruby,
        ] {
            assert!(grammar.language().is_ok(), "{grammar:?} failed to load");
        }
    }

    #[test]
    fn rust_use_is_a_definition() {
        assert!(Grammar::Rust.is_definition_kind("use_declaration"));
        assert!(!Grammar::Python.is_definition_kind("import_statement"));
    }
}
