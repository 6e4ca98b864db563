//! Page queries over a small GraphQL subset.
//!
//! Supported documents:
//!
//! ```graphql
//! query Optional($id: Int) { cmsPage(id: $id) { id title content } }
//! { cmsPages { id identifier url_key } }
//! ```
//!
//! Whitespace, commas and `#` comments are insignificant. The normalizer
//! reduces a document to its token stream so that every spelling the parser
//! accepts as equivalent shares one cache id.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::application::repos::PagesRepo;
use crate::cache::{
    NormalizedQuery, Query, ResolveError, Resolver, TagCollector, VariantContext,
    canonical_with_variables,
};
use crate::domain::pages::{PAGE_TAG_PREFIX, PageRecord};

const PAGE_FIELDS: [&str; 5] = ["id", "identifier", "title", "content", "url_key"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Punct(char),
    Name(String),
    Variable(String),
    Int(i64),
}

impl Token {
    fn render(&self) -> String {
        match self {
            Token::Punct(c) => c.to_string(),
            Token::Name(name) => name.clone(),
            Token::Variable(name) => format!("${name}"),
            Token::Int(value) => value.to_string(),
        }
    }
}

fn tokenize(document: &str) -> Result<Vec<Token>, ResolveError> {
    let mut tokens = Vec::new();
    let mut chars = document.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            '#' => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '{' | '}' | '(' | ')' | ':' | '!' | '[' | ']' => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
            '$' => {
                chars.next();
                let name = take_name(&mut chars);
                if name.is_empty() {
                    return Err(ResolveError::new("Syntax Error: expected variable name after `$`"));
                }
                tokens.push(Token::Variable(name));
            }
            '-' | '0'..='9' => {
                let mut raw = String::new();
                raw.push(c);
                chars.next();
                while let Some(digit) = chars.next_if(char::is_ascii_digit) {
                    raw.push(digit);
                }
                let value = raw
                    .parse()
                    .map_err(|_| ResolveError::new(format!("Syntax Error: invalid number `{raw}`")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                tokens.push(Token::Name(take_name(&mut chars)));
            }
            other => {
                return Err(ResolveError::new(format!(
                    "Syntax Error: unexpected character `{other}`"
                )));
            }
        }
    }

    Ok(tokens)
}

fn take_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut name = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
        name.push(c);
    }
    name
}

/// Canonical spelling of `document`: its tokens joined by single spaces.
///
/// Documents that fail to tokenize are kept verbatim; they will fail again
/// at resolution and are never stored.
pub fn normalize_document(document: &str) -> String {
    match tokenize(document) {
        Ok(tokens) => tokens
            .iter()
            .map(Token::render)
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => document.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Root {
    Page { id: u64, fields: Vec<String> },
    Pages { fields: Vec<String> },
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    variables: &'a Map<String, Value>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], variables: &'a Map<String, Value>) -> Self {
        Self {
            tokens,
            pos: 0,
            variables,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect_punct(&mut self, expected: char) -> Result<(), ResolveError> {
        match self.next() {
            Some(Token::Punct(c)) if *c == expected => Ok(()),
            Some(other) => Err(ResolveError::new(format!(
                "Syntax Error: expected `{expected}`, found `{}`",
                other.render()
            ))),
            None => Err(ResolveError::new(format!(
                "Syntax Error: expected `{expected}`, found end of document"
            ))),
        }
    }

    fn expect_name(&mut self) -> Result<&'a str, ResolveError> {
        match self.next() {
            Some(Token::Name(name)) => Ok(name),
            Some(other) => Err(ResolveError::new(format!(
                "Syntax Error: expected name, found `{}`",
                other.render()
            ))),
            None => Err(ResolveError::new(
                "Syntax Error: expected name, found end of document",
            )),
        }
    }

    fn parse_document(&mut self) -> Result<Root, ResolveError> {
        if let Some(Token::Name(keyword)) = self.peek() {
            if keyword != "query" {
                return Err(ResolveError::new(format!(
                    "Unsupported operation `{keyword}`"
                )));
            }
            self.next();
            if let Some(Token::Name(_)) = self.peek() {
                self.next();
            }
            if let Some(Token::Punct('(')) = self.peek() {
                self.skip_group('(', ')')?;
            }
        }

        self.expect_punct('{')?;
        let root = self.parse_root_field()?;
        self.expect_punct('}')?;

        if let Some(extra) = self.peek() {
            return Err(ResolveError::new(format!(
                "Syntax Error: unexpected `{}` after operation",
                extra.render()
            )));
        }
        Ok(root)
    }

    /// Skip a balanced group such as variable definitions.
    fn skip_group(&mut self, open: char, close: char) -> Result<(), ResolveError> {
        self.expect_punct(open)?;
        let mut depth = 1;
        while depth > 0 {
            match self.next() {
                Some(Token::Punct(c)) if *c == open => depth += 1,
                Some(Token::Punct(c)) if *c == close => depth -= 1,
                Some(_) => {}
                None => {
                    return Err(ResolveError::new(format!(
                        "Syntax Error: unterminated `{open}`"
                    )));
                }
            }
        }
        Ok(())
    }

    fn parse_root_field(&mut self) -> Result<Root, ResolveError> {
        match self.expect_name()? {
            "cmsPage" => {
                let id = self.parse_id_argument()?;
                let fields = self.parse_selection()?;
                Ok(Root::Page { id, fields })
            }
            "cmsPages" => {
                let fields = self.parse_selection()?;
                Ok(Root::Pages { fields })
            }
            other => Err(ResolveError::new(format!(
                "Cannot query field \"{other}\" on type \"Query\"."
            ))),
        }
    }

    fn parse_id_argument(&mut self) -> Result<u64, ResolveError> {
        self.expect_punct('(')?;
        let name = self.expect_name()?;
        if name != "id" {
            return Err(ResolveError::new(format!(
                "Unknown argument \"{name}\" on field \"cmsPage\"."
            )));
        }
        self.expect_punct(':')?;
        let value = match self.next() {
            Some(Token::Int(value)) => Value::from(*value),
            Some(Token::Variable(variable)) => self
                .variables
                .get(variable)
                .cloned()
                .ok_or_else(|| {
                    ResolveError::new(format!("Variable \"${variable}\" was not provided."))
                })?,
            _ => {
                return Err(ResolveError::new(
                    "Argument \"id\" on field \"cmsPage\" must be an integer.",
                ));
            }
        };
        self.expect_punct(')')?;

        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
            .ok_or_else(|| ResolveError::new(format!("Invalid page id `{value}`.")))
    }

    fn parse_selection(&mut self) -> Result<Vec<String>, ResolveError> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Punct('}')) => {
                    self.next();
                    break;
                }
                Some(_) => {
                    let field = self.expect_name()?;
                    if !PAGE_FIELDS.contains(&field) {
                        return Err(ResolveError::new(format!(
                            "Cannot query field \"{field}\" on type \"CmsPage\"."
                        )));
                    }
                    if !fields.iter().any(|seen| seen == field) {
                        fields.push(field.to_string());
                    }
                }
                None => {
                    return Err(ResolveError::new(
                        "Syntax Error: expected `}`, found end of document",
                    ));
                }
            }
        }
        if fields.is_empty() {
            return Err(ResolveError::new("Selection set must not be empty."));
        }
        Ok(fields)
    }
}

fn parse(query: &NormalizedQuery) -> Result<Root, ResolveError> {
    let (document, variables) = match query.as_str().split_once('\n') {
        Some((document, encoded)) => {
            let variables = serde_json::from_str::<Map<String, Value>>(encoded)
                .map_err(|err| ResolveError::new(format!("Invalid variables: {err}")))?;
            (document, variables)
        }
        None => (query.as_str(), Map::new()),
    };

    let tokens = tokenize(document)?;
    Parser::new(&tokens, &variables).parse_document()
}

fn project(page: &PageRecord, fields: &[String]) -> Value {
    let mut object = Map::new();
    for field in fields {
        let value = match field.as_str() {
            "id" => Value::from(page.id),
            "identifier" => Value::from(page.identifier.clone()),
            "title" => Value::from(page.title.clone()),
            "content" => Value::from(page.content.clone()),
            "url_key" => Value::from(page.url_key.clone()),
            _ => continue,
        };
        object.insert(field.clone(), value);
    }
    Value::Object(object)
}

/// Resolves page queries against a [`PagesRepo`], recording page tags.
#[derive(Clone)]
pub struct PageResolver {
    pages: Arc<dyn PagesRepo>,
}

impl PageResolver {
    pub fn new(pages: Arc<dyn PagesRepo>) -> Self {
        Self { pages }
    }

    fn record(tags: &TagCollector, page: &PageRecord) {
        tags.record_entity(page);
        if !page.cacheable {
            tags.mark_uncacheable();
        }
    }
}

#[async_trait]
impl Resolver for PageResolver {
    fn normalize(&self, query: &Query) -> NormalizedQuery {
        canonical_with_variables(&normalize_document(&query.document), &query.variables)
    }

    async fn resolve(
        &self,
        query: &NormalizedQuery,
        _context: &VariantContext,
        tags: &TagCollector,
    ) -> Result<Value, ResolveError> {
        match parse(query)? {
            Root::Page { id, fields } => {
                let page = self
                    .pages
                    .find_by_id(id)
                    .await
                    .map_err(|err| ResolveError::new(format!("failed to load page {id}: {err}")))?
                    .ok_or_else(|| ResolveError::new(format!("Page with id \"{id}\" not found.")))?;
                Self::record(tags, &page);

                let mut data = Map::new();
                data.insert("cmsPage".to_string(), project(&page, &fields));
                Ok(Value::Object(data))
            }
            Root::Pages { fields } => {
                let pages = self
                    .pages
                    .list()
                    .await
                    .map_err(|err| ResolveError::new(format!("failed to list pages: {err}")))?;
                // A listing depends on the type even when it is empty.
                tags.record(PAGE_TAG_PREFIX);
                for page in &pages {
                    Self::record(tags, page);
                }

                let items = pages.iter().map(|page| project(page, &fields)).collect();
                let mut data = Map::new();
                data.insert("cmsPages".to_string(), Value::Array(items));
                Ok(Value::Object(data))
            }
        }
    }
}
