//! Helper Reference Check
//!
//! The template engine resolves functions and filters lazily, when a render
//! reaches them. This module scans markup ahead of time so a misspelled
//! helper fails compilation with a `TemplateSyntax` error naming the source
//! and line, instead of surfacing on the first request that hits it.
//!
//! The scan is lexical: identifiers immediately followed by `(` are function
//! calls, identifiers after `|` (or in `{% filter name %}`) are filters.
//! Attribute calls (`x.y()`), tests (`x is divisibleby(3)`) and keywords are
//! skipped. Names declared anywhere in the unit count as known: macros,
//! macro and call-block parameters, `set`/`with`/`for` targets, and imports.

use std::collections::BTreeSet;

use crate::error::ViewError;

const KEYWORDS: &[&str] = &[
    "and", "as", "block", "call", "context", "elif", "else", "endblock", "endcall", "endfilter",
    "endfor", "endif", "endmacro", "endset", "endwith", "extends", "false", "filter", "for", "from",
    "if", "ignore", "import", "in", "include", "is", "macro", "missing", "none", "not", "or",
    "recursive", "set", "true", "with", "without", "False", "True", "None",
];

const BUILTIN_FUNCTIONS: &[&str] = &[
    "caller", "cycler", "debug", "dict", "joiner", "loop", "namespace", "range", "super",
];

const BUILTIN_FILTERS: &[&str] = &[
    "abs", "attr", "batch", "bool", "capitalize", "chain", "count", "d", "default", "dictsort", "e",
    "escape", "first", "float", "format", "groupby", "indent", "int", "items", "join", "last",
    "length", "lines", "list", "lower", "map", "max", "min", "pprint", "reject", "rejectattr",
    "replace", "reverse", "round", "safe", "select", "selectattr", "slice", "sort", "split",
    "string", "sum", "title", "tojson", "trim", "unique", "upper", "urlencode", "wordcount", "zip",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Function,
    Filter,
}

impl ReferenceKind {
    fn label(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Filter => "filter",
        }
    }
}

/// One helper use found in markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperReference<'a> {
    pub name: &'a str,
    pub kind: ReferenceKind,
    pub line: usize,
}

/// Everything a single source contributes to the check
#[derive(Debug, Default)]
pub struct SourceScan<'a> {
    pub references: Vec<HelperReference<'a>>,
    pub declared: BTreeSet<&'a str>,
}

/// True for names the engine provides without registration
pub fn is_builtin(name: &str, kind: ReferenceKind) -> bool {
    match kind {
        ReferenceKind::Function => BUILTIN_FUNCTIONS.contains(&name),
        ReferenceKind::Filter => BUILTIN_FILTERS.contains(&name),
    }
}

/// Verify every helper referenced by a unit resolves. `is_known` answers for
/// registered helpers; builtins and names declared in the unit are accepted.
pub fn check_helper_references<F>(units: &[(String, String)], is_known: F) -> Result<(), ViewError>
where
    F: Fn(&str) -> bool,
{
    let scans: Vec<_> = units
        .iter()
        .map(|(name, markup)| (name.as_str(), scan(markup)))
        .collect();
    let declared: BTreeSet<&str> = scans
        .iter()
        .flat_map(|(_, s)| s.declared.iter().copied())
        .collect();

    for (source_name, unit) in &scans {
        for reference in &unit.references {
            if declared.contains(reference.name)
                || is_builtin(reference.name, reference.kind)
                || is_known(reference.name)
            {
                continue;
            }
            return Err(ViewError::TemplateSyntax {
                source_name: source_name.to_string(),
                line: Some(reference.line),
                message: format!("unknown {} `{}`", reference.kind.label(), reference.name),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Tok<'a> {
    Ident(&'a str, usize),
    Punct(u8),
    Literal,
}

/// Scan one source for helper references and local declarations
pub fn scan(markup: &str) -> SourceScan<'_> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(markup.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let line_of = |offset: usize| line_starts.partition_point(|&s| s <= offset);

    let bytes = markup.as_bytes();
    let mut out = SourceScan::default();
    let mut pos = 0;

    while let Some(rel) = markup[pos..].find('{') {
        let start = pos + rel;
        match bytes.get(start + 1) {
            Some(b'#') => {
                pos = markup[start + 2..]
                    .find("#}")
                    .map(|i| start + 2 + i + 2)
                    .unwrap_or(markup.len());
            }
            Some(b'{') => {
                let (toks, end) = tokenize(markup, start + 2, b'}');
                collect(&toks, false, &line_of, &mut out);
                pos = end;
            }
            Some(b'%') => {
                let (toks, end) = tokenize(markup, start + 2, b'%');
                if head(&toks).map(|(_, name)| name) == Some("raw") {
                    pos = skip_raw(markup, end);
                } else {
                    collect(&toks, true, &line_of, &mut out);
                    pos = end;
                }
            }
            _ => pos = start + 1,
        }
    }
    out
}

/// Tokens up to the closing `close }` pair, and the offset just past it
fn tokenize(src: &str, from: usize, close: u8) -> (Vec<Tok<'_>>, usize) {
    let bytes = src.as_bytes();
    let mut toks = Vec::new();
    let mut depth = 0usize;
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        if b == close && depth == 0 && bytes.get(i + 1) == Some(&b'}') {
            return (toks, i + 2);
        }
        match b {
            b'"' | b'\'' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                toks.push(Tok::Literal);
            }
            b'0'..=b'9' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.') {
                    i += 1;
                }
                toks.push(Tok::Literal);
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                toks.push(Tok::Ident(&src[start..i], start));
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                match b {
                    b'{' | b'[' | b'(' => depth += 1,
                    b'}' | b']' | b')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
                toks.push(Tok::Punct(b));
                i += 1;
            }
        }
    }
    (toks, bytes.len())
}

/// First identifier of a tag and its token index
fn head<'a>(toks: &[Tok<'a>]) -> Option<(usize, &'a str)> {
    toks.iter().enumerate().find_map(|(i, t)| match t {
        Tok::Ident(name, _) => Some((i, *name)),
        _ => None,
    })
}

fn skip_raw(src: &str, mut pos: usize) -> usize {
    while let Some(rel) = src[pos..].find("{%") {
        let start = pos + rel;
        let (toks, end) = tokenize(src, start + 2, b'%');
        if head(&toks).map(|(_, name)| name) == Some("endraw") {
            return end;
        }
        pos = start + 2;
    }
    src.len()
}

fn collect<'a, L>(toks: &[Tok<'a>], is_tag: bool, line_of: &L, out: &mut SourceScan<'a>)
where
    L: Fn(usize) -> usize,
{
    let tag_head = if is_tag { head(toks) } else { None };
    let tag_name = tag_head.map(|(_, name)| name);
    let mut after_import = false;

    let mut depth = 0usize;
    let depths: Vec<usize> = toks
        .iter()
        .map(|t| {
            let at = depth;
            match t {
                Tok::Punct(b'(' | b'[' | b'{') => depth += 1,
                Tok::Punct(b')' | b']' | b'}') => depth = depth.saturating_sub(1),
                _ => {}
            }
            at
        })
        .collect();

    // `{% macro name(a, b=1) %}` and `{% call(a) name() %}` bind their first
    // parenthesised group; `{% for a, b in ... %}` binds up to `in`
    let params = tag_head.and_then(|(h, name)| {
        let open = match name {
            "macro" => h + 2,
            "call" => h + 1,
            _ => return None,
        };
        if !matches!(toks.get(open), Some(Tok::Punct(b'('))) {
            return None;
        }
        let close = (open + 1..toks.len()).find(|&j| depths[j] == 1 && matches!(toks[j], Tok::Punct(b')')))?;
        Some(open + 1..close)
    });
    let for_targets = match tag_head {
        Some((h, "for")) => toks
            .iter()
            .position(|t| matches!(t, Tok::Ident("in", _)))
            .map(|end| h + 1..end),
        _ => None,
    };

    for (i, tok) in toks.iter().enumerate() {
        let Tok::Ident(name, offset) = *tok else {
            continue;
        };
        let prev = i.checked_sub(1).map(|j| toks[j]);
        let prev_ident = match prev {
            Some(Tok::Ident(p, _)) => Some(p),
            _ => None,
        };

        if name == "import" {
            after_import = true;
            continue;
        }
        if matches!(prev, Some(Tok::Punct(b'.'))) {
            continue;
        }
        if params.as_ref().is_some_and(|r| r.contains(&i))
            && depths[i] == 1
            && matches!(prev, Some(Tok::Punct(b'(' | b',')))
        {
            out.declared.insert(name);
            continue;
        }
        if for_targets.as_ref().is_some_and(|r| r.contains(&i)) {
            out.declared.insert(name);
            continue;
        }
        if matches!(tag_name, Some("with" | "set"))
            && depths[i] == 0
            && matches!(toks.get(i + 1), Some(Tok::Punct(b'=')))
            && !matches!(toks.get(i + 2), Some(Tok::Punct(b'=')))
        {
            out.declared.insert(name);
            continue;
        }
        if matches!(prev, Some(Tok::Punct(b'|')))
            || matches!(tag_head, Some((h, "filter")) if h + 1 == i)
        {
            out.references.push(HelperReference {
                name,
                kind: ReferenceKind::Filter,
                line: line_of(offset),
            });
            continue;
        }
        match prev_ident {
            Some("macro") | Some("set") | Some("as") => {
                out.declared.insert(name);
                continue;
            }
            Some("is") => continue,
            Some("not") if i >= 2 && matches!(toks[i - 2], Tok::Ident("is", _)) => continue,
            _ => {}
        }
        if after_import && matches!(tag_head, Some((_, "from"))) {
            out.declared.insert(name);
            continue;
        }
        if matches!(toks.get(i + 1), Some(Tok::Punct(b'('))) && !KEYWORDS.contains(&name) {
            out.references.push(HelperReference {
                name,
                kind: ReferenceKind::Function,
                line: line_of(offset),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, markup: &str) -> Vec<(String, String)> {
        vec![(name.to_string(), markup.to_string())]
    }

    fn names(markup: &str) -> Vec<(&str, ReferenceKind)> {
        scan(markup)
            .references
            .into_iter()
            .map(|r| (r.name, r.kind))
            .collect()
    }

    #[test]
    fn test_finds_functions_and_filters() {
        let found = names("<p>{{ formatPhone(user.phone) }} {{ total|formatCommas }}</p>");
        assert_eq!(
            found,
            vec![
                ("formatPhone", ReferenceKind::Function),
                ("formatCommas", ReferenceKind::Filter),
            ]
        );
    }

    #[test]
    fn test_skips_attributes_tests_strings_and_comments() {
        let found = names(
            "{# fakeHelper() #}{{ 'noCall()' }}{{ user.name() }}\
             {% if n is divisibleby(3) %}{% endif %}{% if x is not sameas(y) %}{% endif %}",
        );
        assert!(found.is_empty(), "{:?}", found);
    }

    #[test]
    fn test_raw_blocks_are_ignored() {
        let found = names("{% raw %}{{ missing() }}{% endraw %}{{ x|upper }}");
        assert_eq!(found, vec![("upper", ReferenceKind::Filter)]);
    }

    #[test]
    fn test_filter_tag_is_a_filter_reference() {
        let found = names("{% filter toUpper %}hi{% endfilter %}");
        assert_eq!(found, vec![("toUpper", ReferenceKind::Filter)]);
    }

    #[test]
    fn test_declared_macros_are_known() {
        let units = unit(
            "page.html",
            "{% macro row(x) %}<tr>{{ x }}</tr>{% endmacro %}{{ row(1) }}\
             {% from \"forms.html\" import field, label as lbl %}{{ field() }}{{ lbl() }}",
        );
        check_helper_references(&units, |_| false).unwrap();
    }

    #[test]
    fn test_macro_parameters_are_callable() {
        let units = unit(
            "list.html",
            "{% macro each(items, render, sep=dashes(1)) %}\
             {% for i in items %}{{ render(i) }}{{ sep }}{% endfor %}{% endmacro %}\
             {% call(user) each(users, row) %}{{ user(1) }}{% endcall %}",
        );
        check_helper_references(&units, |n| n == "dashes").unwrap();

        // parameter defaults are still checked
        let units = unit("list.html", "{% macro each(items, sep=dahses(1)) %}{% endmacro %}");
        assert!(check_helper_references(&units, |n| n == "dashes").is_err());
    }

    #[test]
    fn test_loop_and_with_bindings_are_callable() {
        let units = unit(
            "bind.html",
            "{% with f = dict %}{{ f(a=1).a }}{% endwith %}\
             {% for key, fmt in pairs %}{{ fmt(key) }}{% endfor %}\
             {% set a, b = pair %}{{ a() }}{{ b() }}",
        );
        check_helper_references(&units, |_| false).unwrap();

        let found = scan("{% with x = 1 %}{% if x == y %}{{ y() }}{% endif %}{% endwith %}");
        assert!(!found.declared.contains("y"));
    }

    #[test]
    fn test_unknown_helper_reports_line() {
        let units = unit("page.html", "<h1>{{ title }}</h1>\n<p>{{ fromatPhone(p) }}</p>");
        let err = check_helper_references(&units, |n| n == "formatPhone").unwrap_err();
        match err {
            ViewError::TemplateSyntax { source_name, line, message } => {
                assert_eq!(source_name, "page.html");
                assert_eq!(line, Some(2));
                assert!(message.contains("fromatPhone"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_builtins_pass() {
        let units = unit(
            "list.html",
            "{% for i in range(3) %}{{ i|default(0)|round }}{{ loop.index }}{% endfor %}{{ super() }}",
        );
        check_helper_references(&units, |_| false).unwrap();
    }

    #[test]
    fn test_nested_braces_do_not_end_expression() {
        let found = names("{{ render({'a': {'b': 1}}) }}{{ x|dashes }}");
        assert_eq!(
            found,
            vec![("render", ReferenceKind::Function), ("dashes", ReferenceKind::Filter)]
        );
    }
}
