//! Host expression parsing.
//!
//! An expression is a comma (or whitespace) separated list of tokens:
//!
//! | Token          | Selects                                      |
//! |----------------|----------------------------------------------|
//! | `%group`       | every host of a work group                   |
//! | `%group#tag`   | hosts of the group carrying `tag`            |
//! | `host[:port]`  | a literal host                               |
//! | `-token`       | removes whatever `token` selects             |
//!
//! Exclusions apply after every inclusion, wherever they appear.

use indexmap::IndexSet;

use super::host::Host;
use crate::error::{Error, Result};

/// What a single token refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Hosts of a work group, optionally narrowed to one tag
    Group { name: String, tag: Option<String> },
    /// One explicitly named host
    Literal(Host),
}

impl Selector {
    /// Hosts this selector picks out of the resolved group members
    pub fn expand(&self, group_hosts: &[Host]) -> Vec<Host> {
        match self {
            Selector::Group { name, tag } => group_hosts
                .iter()
                .filter(|h| h.group.as_deref() == Some(name.as_str()))
                .filter(|h| tag.as_deref().map_or(true, |t| h.has_tag(t)))
                .cloned()
                .collect(),
            Selector::Literal(literal) => vec![literal.clone()],
        }
    }
}

/// One parsed token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    /// What the token selects
    pub selector: Selector,
    /// `-` prefix
    pub exclude: bool,
}

/// A parsed host expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostExpression {
    source: String,
    terms: Vec<Term>,
}

impl HostExpression {
    /// Parse an expression
    pub fn parse(expr: &str) -> Result<Self> {
        let terms = expr
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| parse_term(expr, token))
            .collect::<Result<Vec<_>>>()?;

        if terms.is_empty() {
            return Err(Error::invalid_expression(expr, "no hosts or groups given"));
        }
        if terms.iter().all(|t| t.exclude) {
            return Err(Error::invalid_expression(expr, "only exclusions given"));
        }

        Ok(Self {
            source: expr.to_string(),
            terms,
        })
    }

    /// The original expression text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed tokens in order
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Work groups that must be resolved, first-seen order
    pub fn groups(&self) -> Vec<String> {
        self.terms
            .iter()
            .filter_map(|t| match &t.selector {
                Selector::Group { name, .. } => Some(name.clone()),
                Selector::Literal(_) => None,
            })
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }

    /// Expand against the hosts of the referenced groups.
    ///
    /// `group_hosts` must be stamped with their work group. The result is
    /// deduplicated and keeps first-seen order.
    pub fn select(&self, group_hosts: &[Host]) -> Vec<Host> {
        let mut selected: IndexSet<Host> = IndexSet::new();

        for term in self.terms.iter().filter(|t| !t.exclude) {
            selected.extend(term.selector.expand(group_hosts));
        }

        for term in self.terms.iter().filter(|t| t.exclude) {
            let dropped: IndexSet<Host> = term.selector.expand(group_hosts).into_iter().collect();
            selected.retain(|host| !dropped.contains(host));
        }

        selected.into_iter().collect()
    }
}

fn parse_term(expr: &str, token: &str) -> Result<Term> {
    let (exclude, body) = match token.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, token),
    };
    if body.is_empty() {
        return Err(Error::invalid_expression(expr, format!("dangling '{}'", token)));
    }

    let selector = match body.strip_prefix('%') {
        Some(group) => {
            let (name, tag) = match group.split_once('#') {
                Some((name, tag)) => (name, Some(tag)),
                None => (group, None),
            };
            if name.is_empty() {
                return Err(Error::invalid_expression(expr, "empty group name"));
            }
            if tag.is_some_and(str::is_empty) {
                return Err(Error::invalid_expression(
                    expr,
                    format!("empty tag in '{}'", token),
                ));
            }
            Selector::Group {
                name: name.to_string(),
                tag: tag.map(str::to_string),
            }
        }
        None => Selector::Literal(
            Host::parse(body).map_err(|e| Error::invalid_expression(expr, e.to_string()))?,
        ),
    };

    Ok(Term { selector, exclude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(hosts: &[Host]) -> Vec<String> {
        hosts.iter().map(Host::name).collect()
    }

    fn web_hosts() -> Vec<Host> {
        vec![
            Host::new("web1").with_group("web").with_tags(["eu"]),
            Host::new("web2").with_group("web").with_tags(["us"]),
            Host::new("web3").with_group("web").with_tags(["eu", "canary"]),
        ]
    }

    #[test]
    fn test_parse_tokens() {
        let expr = HostExpression::parse("%web#eu, db1:2222 -web3").unwrap();
        assert_eq!(expr.terms().len(), 3);
        assert_eq!(
            expr.terms()[0].selector,
            Selector::Group {
                name: "web".to_string(),
                tag: Some("eu".to_string())
            }
        );
        assert_eq!(
            expr.terms()[1].selector,
            Selector::Literal(Host::new("db1").with_port(2222))
        );
        assert!(expr.terms()[2].exclude);
        assert_eq!(expr.groups(), vec!["web".to_string()]);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for bad in ["", " , ", "%", "-", "%web#", "-web1", "db1:0"] {
            assert!(
                matches!(
                    HostExpression::parse(bad),
                    Err(Error::InvalidExpression { .. })
                ),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_select_group_with_tag() {
        let expr = HostExpression::parse("%web#eu").unwrap();
        assert_eq!(names(&expr.select(&web_hosts())), vec!["web1", "web3"]);
    }

    #[test]
    fn test_select_dedupes_in_order() {
        let expr = HostExpression::parse("web2,%web,web2").unwrap();
        assert_eq!(names(&expr.select(&web_hosts())), vec!["web2", "web1", "web3"]);
    }

    #[test]
    fn test_excluded_group_membership() {
        let mut hosts = web_hosts();
        hosts.push(Host::new("web3").with_group("canary"));
        let expr = HostExpression::parse("%web,-%canary").unwrap();
        assert_eq!(expr.groups(), vec!["web".to_string(), "canary".to_string()]);
        assert_eq!(names(&expr.select(&hosts)), vec!["web1", "web2"]);
    }

    #[test]
    fn test_exclusion_applies_anywhere() {
        let expr = HostExpression::parse("-web2,%web").unwrap();
        assert_eq!(names(&expr.select(&web_hosts())), vec!["web1", "web3"]);

        let expr = HostExpression::parse("%web,-%web#canary").unwrap();
        assert_eq!(names(&expr.select(&web_hosts())), vec!["web1", "web2"]);
    }
}
