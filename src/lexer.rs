//! Lexer — tokenizes preprocessed C text while preserving the exact spelling
//! of character and string literals, and a brace/paren-aware scanner used
//! by the scanner and synthesizer to find matching delimiters without
//! tripping over literals or comments.
//!
//! This is *not* a C grammar: there is no AST here, only a flat token
//! stream and a balanced-delimiter scanner. That is intentional — PUS
//! never parses C (see spec Non-goals); it only needs enough lexical
//! awareness to avoid the bug class where a brace or quote inside a
//! literal or comment is mistaken for real C structure.

use std::fmt;

/// A single lexical token. Character and string literals carry their
/// **exact original spelling**, including the surrounding quotes and any
/// escape sequences — this is the fix for the class of bugs where literal
/// content was stamped with a placeholder and `case '+':` collapsed with
/// `case '-':` into duplicate case values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Number(String),
    CharLit(String),
    StringLit(String),
    Punct(String),
    PreprocLine(String),
    Comment(String),
    Whitespace,
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s)
            | Token::Number(s)
            | Token::CharLit(s)
            | Token::StringLit(s)
            | Token::Punct(s)
            | Token::PreprocLine(s)
            | Token::Comment(s) => f.write_str(s),
            Token::Whitespace => f.write_str(" "),
            Token::Newline => f.write_str("\n"),
        }
    }
}

/// The lexical state an in-progress scan is in. Shared by the tokenizer,
/// the identifier extractor, and the brace/paren balance scanner so all
/// three agree on what counts as "inside a literal or comment".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Normal,
    InChar,
    InString,
    InLineComment,
    InBlockComment,
}

/// Tokenize `src` into a flat stream. Whitespace and newlines are preserved
/// as their own tokens so callers that need to reconstruct spans (the
/// declaration synthesizer, in particular) don't need to re-derive them.
pub fn tokenize(src: &str) -> Vec<Token> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut state = LexState::Normal;

    while i < chars.len() {
        let c = chars[i];
        match state {
            LexState::InLineComment => {
                let start = i;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                tokens.push(Token::Comment(chars[start..i].iter().collect()));
                state = LexState::Normal;
            }
            LexState::InBlockComment => {
                let start = i;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                let end = (i + 2).min(chars.len());
                tokens.push(Token::Comment(chars[start..end].iter().collect()));
                i = end;
                state = LexState::Normal;
            }
            LexState::InChar | LexState::InString => {
                let quote = if state == LexState::InChar { '\'' } else { '"' };
                let start = i;
                i += 1; // opening quote already consumed by caller
                while i < chars.len() {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 2;
                        continue;
                    }
                    if chars[i] == quote {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(if quote == '\'' {
                    Token::CharLit(text)
                } else {
                    Token::StringLit(text)
                });
                state = LexState::Normal;
            }
            LexState::Normal => match c {
                '/' if chars.get(i + 1) == Some(&'/') => {
                    state = LexState::InLineComment;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    state = LexState::InBlockComment;
                }
                '\'' => {
                    state = LexState::InChar;
                }
                '"' => {
                    state = LexState::InString;
                }
                '\n' => {
                    tokens.push(Token::Newline);
                    i += 1;
                }
                '#' if at_line_start(&chars, i) => {
                    let start = i;
                    while i < chars.len() && chars[i] != '\n' {
                        // a trailing backslash continues the directive onto the next line
                        if chars[i] == '\\' && chars.get(i + 1) == Some(&'\n') {
                            i += 2;
                            continue;
                        }
                        i += 1;
                    }
                    tokens.push(Token::PreprocLine(chars[start..i].iter().collect()));
                }
                c if c.is_whitespace() => {
                    while i < chars.len() && chars[i].is_whitespace() && chars[i] != '\n' {
                        i += 1;
                    }
                    tokens.push(Token::Whitespace);
                }
                c if is_ident_start(c) => {
                    let start = i;
                    while i < chars.len() && is_ident_continue(chars[i]) {
                        i += 1;
                    }
                    tokens.push(Token::Ident(chars[start..i].iter().collect()));
                }
                c if c.is_ascii_digit() => {
                    let start = i;
                    while i < chars.len()
                        && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_')
                    {
                        i += 1;
                    }
                    tokens.push(Token::Number(chars[start..i].iter().collect()));
                }
                _ => {
                    tokens.push(Token::Punct(c.to_string()));
                    i += 1;
                }
            },
        }
    }
    tokens
}

fn at_line_start(chars: &[char], i: usize) -> bool {
    let mut j = i;
    while j > 0 {
        j -= 1;
        match chars[j] {
            ' ' | '\t' => continue,
            '\n' => return true,
            _ => return false,
        }
    }
    true
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// C keywords, ignored when resolving identifier references (spec §4.E.3).
pub const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary",
];

/// Extract every identifier in `src`, in order, skipping the contents of
/// string/char literals, comments, and preprocessor-directive lines, and
/// skipping C keywords. Used by the dependency resolver to find what a
/// symbol's raw text references.
pub fn extract_identifiers(src: &str) -> Vec<String> {
    tokenize(src)
        .into_iter()
        .filter_map(|t| match t {
            Token::Ident(s) if !C_KEYWORDS.contains(&s.as_str()) => Some(s),
            _ => None,
        })
        .collect()
}

/// Scan forward from `open_idx` (which must point at `open`) and return the
/// byte index just past the matching `close`, correctly stepping across
/// character literals, string literals, and comments. Returns `None` if the
/// delimiter never balances (truncated/malformed input).
///
/// This is the brace-depth tracker named in spec §4.A: used both to find
/// the nested body of an inline struct (scanner) and to find the end of a
/// function's parameter list when converting a definition into a
/// declaration (synthesizer).
pub fn scan_balanced(src: &str, open_idx: usize, open: char, close: char) -> Option<usize> {
    let bytes_to_char: Vec<(usize, char)> = src.char_indices().collect();
    let start_pos = bytes_to_char.iter().position(|&(b, _)| b == open_idx)?;
    debug_assert_eq!(bytes_to_char[start_pos].1, open);

    let mut depth: i32 = 0;
    let mut state = LexState::Normal;
    let mut i = start_pos;
    while i < bytes_to_char.len() {
        let (byte_pos, c) = bytes_to_char[i];
        match state {
            LexState::InLineComment => {
                if c == '\n' {
                    state = LexState::Normal;
                }
            }
            LexState::InBlockComment => {
                if c == '*' && bytes_to_char.get(i + 1).map(|&(_, c2)| c2) == Some('/') {
                    state = LexState::Normal;
                    i += 1;
                }
            }
            LexState::InChar | LexState::InString => {
                let quote = if state == LexState::InChar { '\'' } else { '"' };
                if c == '\\' {
                    i += 1; // skip escaped char
                } else if c == quote {
                    state = LexState::Normal;
                }
            }
            LexState::Normal => match c {
                '/' if bytes_to_char.get(i + 1).map(|&(_, c2)| c2) == Some('/') => {
                    state = LexState::InLineComment;
                }
                '/' if bytes_to_char.get(i + 1).map(|&(_, c2)| c2) == Some('*') => {
                    state = LexState::InBlockComment;
                }
                '\'' => state = LexState::InChar,
                '"' => state = LexState::InString,
                c if c == open => depth += 1,
                c if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(byte_pos + c.len_utf8());
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Scan forward from byte index `from`, stepping across string/char
/// literals and comments, and return the byte index of the first
/// occurrence of `target` at bracket depth 0 (counting `()`, `{}` and
/// `[]` together). Used to find the end of a declaration/statement
/// without a full grammar — e.g. the terminating `;` of a `typedef` or a
/// static function-pointer variable.
pub fn find_top_level_char(src: &str, from: usize, target: char) -> Option<usize> {
    let indices: Vec<(usize, char)> = src.char_indices().collect();
    let start = indices.iter().position(|&(b, _)| b == from)?;

    let mut depth: i32 = 0;
    let mut state = LexState::Normal;
    let mut i = start;
    while i < indices.len() {
        let (byte_pos, c) = indices[i];
        match state {
            LexState::InLineComment => {
                if c == '\n' {
                    state = LexState::Normal;
                }
            }
            LexState::InBlockComment => {
                if c == '*' && indices.get(i + 1).map(|&(_, c2)| c2) == Some('/') {
                    state = LexState::Normal;
                    i += 1;
                }
            }
            LexState::InChar | LexState::InString => {
                let quote = if state == LexState::InChar { '\'' } else { '"' };
                if c == '\\' {
                    i += 1;
                } else if c == quote {
                    state = LexState::Normal;
                }
            }
            LexState::Normal => match c {
                '/' if indices.get(i + 1).map(|&(_, c2)| c2) == Some('/') => {
                    state = LexState::InLineComment;
                }
                '/' if indices.get(i + 1).map(|&(_, c2)| c2) == Some('*') => {
                    state = LexState::InBlockComment;
                }
                '\'' => state = LexState::InChar,
                '"' => state = LexState::InString,
                '(' | '{' | '[' => depth += 1,
                ')' | '}' | ']' => depth -= 1,
                c if c == target && depth == 0 => return Some(byte_pos),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_preserves_exact_spelling() {
        let toks = tokenize(r#"case '+': case '-': case '\'': case '{':"#);
        let lits: Vec<String> = toks
            .into_iter()
            .filter_map(|t| match t {
                Token::CharLit(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(lits, vec![r"'+'", r"'-'", r"'\''", r"'{'"]);
    }

    #[test]
    fn string_literal_with_braces_does_not_affect_depth() {
        let src = "void f() { const char *s = \"{}\"; }";
        let open = src.find('{').unwrap();
        let end = scan_balanced(src, open, '{', '}').unwrap();
        assert_eq!(&src[open..end], "{ const char *s = \"{}\"; }");
    }

    #[test]
    fn line_comment_hides_brace() {
        let src = "void f() { // }\n  x = 1; }";
        let open = src.find('{').unwrap();
        let end = scan_balanced(src, open, '{', '}').unwrap();
        assert_eq!(&src[open..end], src[open..].trim_end());
    }

    #[test]
    fn extract_identifiers_skips_keywords_and_literals() {
        let ids = extract_identifiers(r#"static int foo(char *bar) { return bar + baz("x"); }"#);
        assert_eq!(ids, vec!["foo", "bar", "bar", "baz"]);
    }

    #[test]
    fn top_level_char_skips_nested_semicolons() {
        let src = "typedef struct X *A, *B[N(1;2)];";
        let start = src.find("typedef").unwrap();
        let semi = find_top_level_char(src, start, ';').unwrap();
        assert_eq!(semi, src.len() - 1);
    }

    #[test]
    fn matching_paren_across_multiline_signature() {
        let src = "static char_u *\nreplace_makeprg(exarg_T *eap, char_u *p, char_u **cmdlinep)\n{\n    return p;\n}";
        let open = src.find('(').unwrap();
        let end = scan_balanced(src, open, '(', ')').unwrap();
        assert_eq!(
            &src[open..end],
            "(exarg_T *eap, char_u *p, char_u **cmdlinep)"
        );
    }
}
