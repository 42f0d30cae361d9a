use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Keywords that turn a get query into an aggregate query.
const AGGREGATE_KEYWORDS: [&str; 8] = [
    "count", "sum", "max", "min", "mean", "median", "std", "group",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Define,
    Undefine,
    Insert,
    Delete,
    Update,
    Get,
    Fetch,
    Aggregate,
}

impl StatementKind {
    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::Define => "Define query",
            StatementKind::Undefine => "Undefine query",
            StatementKind::Insert => "Insert query",
            StatementKind::Delete => "Delete query",
            StatementKind::Update => "Update query",
            StatementKind::Get => "Get query",
            StatementKind::Fetch => "Fetch query",
            StatementKind::Aggregate => "Get Aggregate query",
        }
    }

    /// Statements that return nothing but an acknowledgement.
    pub fn is_unit(&self) -> bool {
        matches!(
            self,
            StatementKind::Define | StatementKind::Undefine | StatementKind::Delete
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeQlStatement {
    pub kind: StatementKind,
    pub text: String,
    pub start_byte: usize,
    pub end_byte: usize,
    /// Zero-based
    pub start_line: usize,
    pub end_line: usize,
    pub has_limit: bool,
}

impl TypeQlStatement {
    /// Text to send to the server. Get queries without their own `limit`
    /// receive the configured one.
    pub fn with_limit(&self, limit: Option<u64>) -> Cow<'_, str> {
        match limit {
            Some(limit) if self.kind == StatementKind::Get && !self.has_limit => {
                Cow::Owned(format!("{} limit {};", self.text, limit))
            }
            _ => Cow::Borrowed(&self.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzeError {
    #[error("query starting on line {} is not terminated", .line + 1)]
    Unterminated { line: usize },
    #[error("unexpected '{keyword}' at the start of a query on line {}", .line + 1)]
    UnexpectedStart { keyword: String, line: usize },
}

/// A `;`-terminated clause at brace depth zero.
#[derive(Debug)]
struct Clause<'a> {
    head: &'a str,
    first_word: &'a str,
    start_byte: usize,
    end_byte: usize,
    start_line: usize,
    end_line: usize,
}

struct Builder<'a> {
    heads: Vec<&'a str>,
    start_byte: usize,
    end_byte: usize,
    start_line: usize,
    end_line: usize,
}

impl<'a> Builder<'a> {
    fn new(clause: &Clause<'a>) -> Self {
        Self {
            heads: vec![clause.head],
            start_byte: clause.start_byte,
            end_byte: clause.end_byte,
            start_line: clause.start_line,
            end_line: clause.end_line,
        }
    }

    fn extend(&mut self, clause: &Clause<'a>) {
        if !clause.head.is_empty() {
            self.heads.push(clause.head);
        }
        self.end_byte = clause.end_byte;
        self.end_line = clause.end_line;
    }

    fn has(&self, keyword: &str) -> bool {
        self.heads.iter().any(|head| *head == keyword)
    }

    fn has_aggregate(&self) -> bool {
        self.heads
            .iter()
            .any(|head| AGGREGATE_KEYWORDS.contains(head))
    }

    /// `match ...; insert ...;` and `match ...; delete ...; insert ...;`
    fn accepts_insert(&self) -> bool {
        self.heads[0] == "match"
            && !self.has("insert")
            && !self.has("get")
            && !self.has("fetch")
            && !self.has_aggregate()
    }

    fn kind(&self) -> StatementKind {
        match self.heads[0] {
            "define" => StatementKind::Define,
            "undefine" => StatementKind::Undefine,
            "insert" => StatementKind::Insert,
            _ if self.has("insert") && self.has("delete") => StatementKind::Update,
            _ if self.has("insert") => StatementKind::Insert,
            _ if self.has("delete") => StatementKind::Delete,
            _ if self.has("fetch") => StatementKind::Fetch,
            _ if self.has_aggregate() => StatementKind::Aggregate,
            _ => StatementKind::Get,
        }
    }

    fn finish(self, source: &str) -> TypeQlStatement {
        TypeQlStatement {
            kind: self.kind(),
            text: source[self.start_byte..self.end_byte].trim().to_string(),
            start_byte: self.start_byte,
            end_byte: self.end_byte,
            start_line: self.start_line,
            end_line: self.end_line,
            has_limit: self.has("limit"),
        }
    }
}

/// Split a batch of TypeQL into classified statements.
pub fn analyze(source: &str) -> Result<Vec<TypeQlStatement>, AnalyzeError> {
    let clauses = split_clauses(source)?;

    let mut statements = Vec::new();
    let mut current: Option<Builder> = None;

    for clause in &clauses {
        let starts_query = match clause.head {
            "define" | "undefine" | "match" => true,
            "insert" => !current.as_ref().is_some_and(Builder::accepts_insert),
            _ => false,
        };

        if starts_query {
            if let Some(builder) = current.replace(Builder::new(clause)) {
                statements.push(builder.finish(source));
            }
            continue;
        }

        match current.as_mut() {
            Some(builder) => builder.extend(clause),
            None => {
                return Err(AnalyzeError::UnexpectedStart {
                    keyword: clause.first_word.to_string(),
                    line: clause.start_line,
                });
            }
        }
    }

    if let Some(builder) = current {
        statements.push(builder.finish(source));
    }

    Ok(statements)
}

fn split_clauses(source: &str) -> Result<Vec<Clause<'_>>, AnalyzeError> {
    let mut clauses = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut depth = 0usize;
    let mut line = 0usize;
    let mut start: Option<(usize, usize)> = None;

    while let Some((index, c)) = chars.next() {
        match c {
            '\n' => line += 1,
            '#' => {
                while let Some((_, next)) = chars.peek() {
                    if *next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' | '\'' => {
                let string_line = line;
                start.get_or_insert((index, line));
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => {
                            if let Some((_, '\n')) = chars.next() {
                                line += 1;
                            }
                        }
                        '\n' => line += 1,
                        quote if quote == c => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(AnalyzeError::Unterminated { line: string_line });
                }
            }
            '{' => {
                start.get_or_insert((index, line));
                depth += 1;
            }
            '}' => {
                start.get_or_insert((index, line));
                depth = depth.saturating_sub(1);
            }
            ';' if depth == 0 => {
                // Stray `;` with nothing before it is ignored
                if let Some((start_byte, start_line)) = start.take() {
                    let text = &source[start_byte..index];
                    let first_word = text.split_whitespace().next().unwrap_or_default();
                    let head_len = text
                        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'))
                        .unwrap_or(text.len());
                    clauses.push(Clause {
                        head: &text[..head_len],
                        first_word,
                        start_byte,
                        end_byte: index + 1,
                        start_line,
                        end_line: line,
                    });
                }
            }
            c if c.is_whitespace() => {}
            _ => {
                start.get_or_insert((index, line));
            }
        }
    }

    if let Some((_, start_line)) = start {
        return Err(AnalyzeError::Unterminated { line: start_line });
    }

    Ok(clauses)
}
