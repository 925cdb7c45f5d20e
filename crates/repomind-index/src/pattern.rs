//! Gitignore-style glob rules with last-match-wins evaluation.

use regex::Regex;

/// One compiled ignore rule.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    negated: bool,
    dir_only: bool,
    anchored: bool,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    /// Fallback when translation does not yield a valid regex.
    Literal(String),
}

impl Pattern {
    /// Compile a gitignore-style rule. Never fails: malformed syntax degrades
    /// to a literal match.
    #[must_use]
    pub fn compile(raw: &str) -> Self {
        let mut body = raw.trim_end_matches(['\r', '\n']);
        let mut negated = false;
        if let Some(rest) = body.strip_prefix('!') {
            negated = true;
            body = rest;
        } else if body.starts_with("\\!") {
            body = &body[1..];
        }

        let dir_only = body.len() > 1 && body.ends_with('/');
        if dir_only {
            body = &body[..body.len() - 1];
        }

        let leading_slash = body.starts_with('/');
        if leading_slash {
            body = &body[1..];
        }
        let anchored = leading_slash || body.contains('/');

        let translated = translate(body);
        let source = if anchored {
            format!("^{translated}$")
        } else {
            format!("^(?:.*/)?{translated}$")
        };

        let matcher = match Regex::new(&source) {
            Ok(re) => Matcher::Regex(re),
            Err(e) => {
                tracing::debug!(pattern = raw, "glob degraded to literal match: {e}");
                Matcher::Literal(body.to_owned())
            }
        };

        Self {
            raw: raw.to_owned(),
            negated,
            dir_only,
            anchored,
            matcher,
        }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    #[must_use]
    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    #[must_use]
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Test a `/`-separated path relative to the pattern's base.
    #[must_use]
    pub fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let path = normalize(path);
        match &self.matcher {
            Matcher::Regex(re) => re.is_match(path),
            Matcher::Literal(lit) => {
                if self.anchored {
                    path == lit
                } else {
                    path == lit || path.ends_with(&format!("/{lit}"))
                }
            }
        }
    }
}

fn normalize(path: &str) -> &str {
    let mut p = path;
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p.trim_start_matches('/').trim_end_matches('/')
}

/// Translate glob syntax to a regex body (without anchors).
fn translate(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*?/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                if let Some(close) = class_end(&chars, i) {
                    out.push('[');
                    let mut j = i + 1;
                    if matches!(chars.get(j), Some('!' | '^')) {
                        out.push('^');
                        j += 1;
                    }
                    for &cc in &chars[j..close] {
                        if matches!(cc, '\\' | '[' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(cc);
                    }
                    out.push(']');
                    i = close + 1;
                    continue;
                }
                out.push_str("\\[");
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    out.push_str(&regex::escape(&next.to_string()));
                    i += 2;
                    continue;
                }
                out.push_str("\\\\");
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out
}

/// Index of the `]` closing the class opened at `open`, if any.
fn class_end(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    if matches!(chars.get(j), Some('!' | '^')) {
        j += 1;
    }
    // a `]` right after the opener is a literal member
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return (j > open + 1).then_some(j);
        }
        j += 1;
    }
    None
}

/// Ordered rule list; the last matching rule decides.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    #[must_use]
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = rules
            .into_iter()
            .filter_map(|r| {
                let r = trim_unescaped_end(r.as_ref());
                (!r.is_empty() && !r.starts_with('#')).then(|| Pattern::compile(r))
            })
            .collect();
        Self { patterns }
    }

    /// Parse `.gitignore`-formatted text: one rule per line, `#` comments.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::new(text.lines())
    }

    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    #[must_use]
    pub fn excluded(&self, path: &str, is_dir: bool) -> bool {
        let mut excluded = false;
        for p in &self.patterns {
            if p.matches(path, is_dir) {
                excluded = !p.negated;
            }
        }
        excluded
    }
}

/// Strip trailing whitespace, keeping a space escaped as `\ `.
fn trim_unescaped_end(rule: &str) -> &str {
    let bytes = rule.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        let backslashes = bytes[..end - 1]
            .iter()
            .rev()
            .take_while(|b| **b == b'\\')
            .count();
        if backslashes % 2 == 1 {
            break;
        }
        end -= 1;
    }
    &rule[..end]
}
