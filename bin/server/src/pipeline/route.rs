//! Convention routes such as `{controller=Home}/{action=Index}/{id?}`.

use super::PipelineError;
use rootcause::Report;
use std::collections::{HashMap, HashSet};

/// A parsed convention route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionRoute {
    name: String,
    pattern: String,
    default_controller: Option<String>,
    default_action: Option<String>,
    has_id: bool,
}

/// Values the routing stage resolved for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteValues {
    pub controller: String,
    pub action: String,
    pub id: Option<String>,
}

impl ConventionRoute {
    /// Parses a pattern of `{controller}`, `{action}` and an optional
    /// trailing `{id?}` segment. Controller and action may carry defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRoute` for any other shape.
    pub fn parse(name: &str, pattern: &str) -> Result<Self, Report<PipelineError>> {
        let invalid = |reason: &str| PipelineError::InvalidRoute {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
        if segments.len() < 2 || segments.len() > 3 {
            return Err(invalid("expected {controller}/{action} with an optional {id?}").into());
        }

        let default_controller = parse_parameter(segments[0], "controller")
            .ok_or_else(|| invalid("first segment must be {controller}"))?;
        let default_action = parse_parameter(segments[1], "action")
            .ok_or_else(|| invalid("second segment must be {action}"))?;

        let has_id = match segments.get(2) {
            None => false,
            Some(&"{id?}") | Some(&"{id}") => true,
            Some(_) => return Err(invalid("third segment must be {id?}").into()),
        };

        if default_controller.is_none() && default_action.is_some() {
            return Err(invalid("an action default requires a controller default").into());
        }

        Ok(Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            default_controller,
            default_action,
            has_id,
        })
    }

    /// Returns the route name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the pattern as registered.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the route carries an id segment.
    pub fn has_id(&self) -> bool {
        self.has_id
    }

    /// Expands the request paths that reach `controller`/`action`.
    ///
    /// Shorter forms appear when the omitted values are defaults.
    pub fn paths_for(&self, controller: &str, action: &str) -> Vec<String> {
        let is_default_controller = self.default_controller.as_deref() == Some(controller);
        let is_default_action = self.default_action.as_deref() == Some(action);

        let mut paths = Vec::new();
        if is_default_controller && is_default_action {
            paths.push("/".to_string());
        }
        if is_default_action {
            paths.push(format!("/{controller}"));
        }
        paths.push(format!("/{controller}/{action}"));
        if self.has_id {
            paths.push(format!("/{controller}/{action}/{{id}}"));
        }
        paths
    }

    /// Resolves route values for a concrete request path.
    ///
    /// Missing controller and action segments fall back to the defaults.
    pub fn resolve(&self, path: &str) -> Option<RouteValues> {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() > 2 + usize::from(self.has_id) {
            return None;
        }

        let controller = segments
            .first()
            .map(|s| (*s).to_string())
            .or_else(|| self.default_controller.clone())?;
        let action = segments
            .get(1)
            .map(|s| (*s).to_string())
            .or_else(|| self.default_action.clone())?;
        let id = segments.get(2).map(|s| (*s).to_string());

        Some(RouteValues { controller, action, id })
    }
}

/// Parses `{name}` or `{name=Default}`, returning the default.
///
/// Returns `None` if the segment is not the expected parameter.
fn parse_parameter(segment: &str, expected: &str) -> Option<Option<String>> {
    let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
    match inner.split_once('=') {
        Some((name, default)) if name == expected && !default.is_empty() => {
            Some(Some(default.to_string()))
        }
        None if inner == expected => Some(None),
        _ => None,
    }
}

/// Maps request paths onto the casing the endpoints were mapped with, so
/// `/home/claims` reaches `/Home/Claims`.
#[derive(Debug, Clone, Default)]
pub struct PathFolding {
    /// Lowercased literal path to the mapped path.
    literal: HashMap<String, String>,
    /// Mapped paths that accept a trailing `{id}` segment.
    with_id: HashSet<String>,
}

impl PathFolding {
    /// Builds the folding table from mapped axum path templates.
    pub fn new<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut folding = Self::default();
        for path in paths {
            match path.strip_suffix("/{id}") {
                Some(prefix) => {
                    folding.with_id.insert(prefix.to_string());
                }
                None => {
                    folding
                        .literal
                        .insert(path.to_ascii_lowercase(), path.to_string());
                }
            }
        }
        folding
    }

    /// Returns the mapped spelling of `path` when it differs only in case.
    ///
    /// The id segment keeps its casing. Paths that are already canonical or
    /// reach no endpoint return `None`.
    pub fn canonical(&self, path: &str) -> Option<String> {
        if let Some(mapped) = self.literal.get(&path.to_ascii_lowercase()) {
            return (mapped != path).then(|| mapped.clone());
        }

        let (prefix, id) = path.rsplit_once('/')?;
        if id.is_empty() {
            return None;
        }
        let mapped = self.literal.get(&prefix.to_ascii_lowercase())?;
        if !self.with_id.contains(mapped) || mapped == prefix {
            return None;
        }
        Some(format!("{mapped}/{id}"))
    }
}
